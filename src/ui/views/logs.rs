use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};

use crate::stream::LogEntry;
use crate::ui::renderfns::log_level_color;

/// Draw the newest log lines that fit, oldest at the top
pub fn draw_logs(frame: &mut Frame, area: Rect, logs: &[LogEntry]) {
  let block = Block::default()
    .title(format!(" Logs ({}) ", logs.len()))
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::DarkGray));

  let visible = area.height.saturating_sub(2) as usize;
  let lines: Vec<Line> = logs
    .iter()
    .skip(logs.len().saturating_sub(visible))
    .map(|entry| {
      let mut spans = Vec::new();
      if let Some(ts) = &entry.timestamp {
        spans.push(Span::styled(format!("{} ", ts), Style::default().fg(Color::DarkGray)));
      }
      spans.push(Span::styled(
        format!("{:<5} ", entry.level.to_uppercase()),
        Style::default().fg(log_level_color(&entry.level)),
      ));
      spans.push(Span::raw(entry.message.clone()));
      Line::from(spans)
    })
    .collect();

  frame.render_widget(Paragraph::new(lines).block(block), area);
}
