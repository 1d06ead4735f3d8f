use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Gauge, Paragraph};
use std::time::Instant;

use crate::job::SyncJob;
use crate::stream::{ConnectionState, Progress, StreamStatus};
use crate::ui::renderfns::{age_label, job_status_color, truncate};

/// Everything the status panel shows
pub struct StatusPanel<'a> {
  pub job: &'a SyncJob,
  pub connection: Option<&'a ConnectionState>,
  pub progress: Option<&'a Progress>,
  pub last_event: Option<&'a (String, Instant)>,
  pub monitoring: bool,
}

pub fn draw_status(frame: &mut Frame, area: Rect, panel: &StatusPanel) {
  let block = Block::default()
    .title(" Sync ")
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));
  let inner = block.inner(area);
  frame.render_widget(block, area);

  let show_gauge = panel.job.is_running && panel.progress.is_some();
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Min(1),
      Constraint::Length(if show_gauge { 1 } else { 0 }),
    ])
    .split(inner);

  let label = Style::default().fg(Color::DarkGray);
  let job = panel.job;

  let mut job_line = vec![
    Span::styled("job      ", label),
    Span::styled(
      job.status.label(),
      Style::default().fg(job_status_color(job.status)).bold(),
    ),
  ];
  if let Some(remote) = &job.remote_status {
    job_line.push(Span::styled(format!("  (service: {})", remote), label));
  }
  if panel.monitoring {
    job_line.push(Span::styled("  monitoring", Style::default().fg(Color::Cyan)));
  }

  let activity = match (&job.last_error, &job.last_known_activity) {
    (Some(error), _) => Span::styled(truncate(error, 80), Style::default().fg(Color::Red)),
    (None, Some(activity)) => Span::raw(truncate(activity, 80)),
    (None, None) => Span::styled("-", label),
  };
  let checked = job
    .last_fetched_at
    .map(|at| at.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
    .unwrap_or_else(|| "never".to_string());

  let lines = vec![
    Line::from(job_line),
    Line::from(vec![Span::styled("activity ", label), activity]),
    Line::from(vec![Span::styled("checked  ", label), Span::raw(checked)]),
    Line::from(stream_spans(panel, label)),
  ];
  frame.render_widget(Paragraph::new(lines), chunks[0]);

  if let (true, Some(progress)) = (show_gauge, panel.progress) {
    let text = match &progress.message {
      Some(message) => format!("{}/{} {}", progress.current, progress.total, truncate(message, 40)),
      None => format!("{}/{}", progress.current, progress.total),
    };
    let gauge = Gauge::default()
      .gauge_style(Style::default().fg(Color::Yellow))
      .ratio(progress.ratio())
      .label(text);
    frame.render_widget(gauge, chunks[1]);
  }
}

fn stream_spans(panel: &StatusPanel, label: Style) -> Vec<Span<'static>> {
  let Some(conn) = panel.connection else {
    return vec![Span::styled("stream   ", label), Span::styled("disabled", label)];
  };

  let color = match conn.status {
    StreamStatus::Connected => Color::Green,
    StreamStatus::Connecting => Color::Yellow,
    StreamStatus::Disconnected => Color::DarkGray,
    StreamStatus::Error => Color::Red,
  };
  let mut spans = vec![
    Span::styled("stream   ", label),
    Span::styled(conn.status.label(), Style::default().fg(color)),
  ];
  if conn.reconnect_attempts > 0 {
    spans.push(Span::styled(
      format!(
        "  retry {}/{}",
        conn.reconnect_attempts, conn.max_reconnect_attempts
      ),
      label,
    ));
  }
  if conn.is_terminal() {
    spans.push(Span::styled("  press c to reconnect", Style::default().fg(Color::Red)));
  }
  if let Some((kind, at)) = panel.last_event {
    spans.push(Span::styled(
      format!("  last {} {}", kind, age_label(at.elapsed())),
      label,
    ));
  }
  spans
}
