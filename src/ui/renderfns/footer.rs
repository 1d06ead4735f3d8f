use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use crate::app::Notice;
use crate::event::NoticeLevel;

const HINTS: &[(&str, &str)] = &[
  ("s", "sync"),
  ("x", "stop"),
  ("r", "refresh"),
  ("tab", "list"),
  ("n/p", "page"),
  ("/", "filter"),
  ("l", "logs"),
  ("a", "auto"),
  ("c", "reconnect"),
  ("q", "quit"),
];

/// Draw the footer: the newest notice if there is one, key hints otherwise
pub fn draw_footer<'a>(frame: &mut Frame, area: Rect, notices: impl Iterator<Item = &'a Notice>) {
  let line = match notices.last() {
    Some(notice) => {
      let color = match notice.level {
        NoticeLevel::Info => Color::Green,
        NoticeLevel::Error => Color::Red,
      };
      Line::from(Span::styled(
        format!(" {}", notice.message),
        Style::default().fg(color),
      ))
    }
    None => {
      let mut spans = vec![Span::raw(" ")];
      for (key, label) in HINTS {
        spans.push(Span::styled(format!("<{}>", key), Style::default().fg(Color::Cyan)));
        spans.push(Span::styled(
          format!(" {}  ", label),
          Style::default().fg(Color::DarkGray),
        ));
      }
      Line::from(spans)
    }
  };

  let paragraph = Paragraph::new(line).style(Style::default().bg(Color::Black));
  frame.render_widget(paragraph, area);
}
