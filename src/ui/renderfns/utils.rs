use ratatui::prelude::Color;
use std::time::Duration;

use crate::job::JobStatus;

/// Truncate a string to a maximum number of characters, adding "..." if
/// truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Display color for a processed item's outcome
pub fn item_status_color(status: &str) -> Color {
  match status {
    "requested" | "already_requested" | "available" | "already_available" => Color::Green,
    "not_found" | "skipped" => Color::Yellow,
    "error" | "failed" => Color::Red,
    _ => Color::White,
  }
}

pub fn job_status_color(status: JobStatus) -> Color {
  match status {
    JobStatus::Idle => Color::Green,
    JobStatus::Running => Color::Yellow,
    JobStatus::Stopping | JobStatus::StopUnconfirmed => Color::Magenta,
    JobStatus::Error => Color::Red,
  }
}

pub fn log_level_color(level: &str) -> Color {
  match level.to_ascii_lowercase().as_str() {
    "error" => Color::Red,
    "warn" | "warning" => Color::Yellow,
    "debug" | "trace" => Color::DarkGray,
    _ => Color::White,
  }
}

/// Short relative age, e.g. "12s ago"
pub fn age_label(age: Duration) -> String {
  let secs = age.as_secs();
  match secs {
    0..=59 => format!("{}s ago", secs),
    60..=3599 => format!("{}m ago", secs / 60),
    _ => format!("{}h ago", secs / 3600),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_truncate_short_string() {
    assert_eq!(truncate("Dune", 10), "Dune");
    assert_eq!(truncate("Dune", 4), "Dune");
  }

  #[test]
  fn test_truncate_long_string() {
    assert_eq!(truncate("The Shawshank Redemption", 12), "The Shaws...");
  }

  #[test]
  fn test_truncate_multibyte() {
    assert_eq!(truncate("Amélie Poulain", 8), "Améli...");
    assert_eq!(truncate("Amélie Poulain", 9), "Amélie...");
  }

  #[test]
  fn test_item_status_color() {
    assert_eq!(item_status_color("requested"), Color::Green);
    assert_eq!(item_status_color("not_found"), Color::Yellow);
    assert_eq!(item_status_color("error"), Color::Red);
    assert_eq!(item_status_color("queued"), Color::White);
  }

  #[test]
  fn test_job_status_color() {
    assert_eq!(job_status_color(JobStatus::Running), Color::Yellow);
    assert_eq!(job_status_color(JobStatus::StopUnconfirmed), Color::Magenta);
    assert_eq!(job_status_color(JobStatus::Error), Color::Red);
  }

  #[test]
  fn test_age_label() {
    assert_eq!(age_label(Duration::from_secs(5)), "5s ago");
    assert_eq!(age_label(Duration::from_secs(125)), "2m ago");
    assert_eq!(age_label(Duration::from_secs(7200)), "2h ago");
  }
}
