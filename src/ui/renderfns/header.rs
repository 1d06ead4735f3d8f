use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use crate::job::SyncJob;

use super::utils::job_status_color;

/// Draw the header bar with name, service and job status
pub fn draw_header(frame: &mut Frame, area: Rect, title: &str, service_url: &str, job: &SyncJob) {
  let domain = extract_domain(service_url);

  let mut spans = vec![
    Span::styled(" listsync ", Style::default().fg(Color::Cyan).bold()),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(format!(" {} ", title), Style::default().fg(Color::White)),
  ];
  if title != domain {
    spans.push(Span::styled(
      format!("({}) ", domain),
      Style::default().fg(Color::DarkGray),
    ));
  }
  spans.extend([
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(
      format!(" {} ", job.status.label()),
      Style::default().fg(job_status_color(job.status)).bold(),
    ),
  ]);

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
  frame.render_widget(paragraph, area);
}

/// Extract host and port from the service URL
fn extract_domain(url: &str) -> &str {
  url
    .strip_prefix("https://")
    .or_else(|| url.strip_prefix("http://"))
    .unwrap_or(url)
    .split('/')
    .next()
    .unwrap_or(url)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_extract_domain() {
    assert_eq!(extract_domain("http://localhost:4222"), "localhost:4222");
    assert_eq!(
      extract_domain("https://sync.example.com/listsync"),
      "sync.example.com"
    );
    assert_eq!(extract_domain("nas.local:4222"), "nas.local:4222");
  }
}
