mod components;
pub mod renderfns;
mod views;

use crate::app::App;
use ratatui::prelude::*;

pub use components::{FilterEvent, FilterInput, KeyResult};
use views::{ListView, StatusPanel};

/// Height of the log panel when shown
const LOG_PANEL_HEIGHT: u16 = 10;

/// Main draw function
pub fn draw(frame: &mut Frame, app: &mut App) {
  let log_height = if app.prefs().show_logs {
    LOG_PANEL_HEIGHT
  } else {
    0
  };
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1),          // Header
      Constraint::Length(7),          // Sync status
      Constraint::Min(5),             // Lists
      Constraint::Length(log_height), // Logs
      Constraint::Length(1),          // Footer
    ])
    .split(frame.area());

  let job = app.job();
  renderfns::draw_header(frame, chunks[0], &app.title(), app.service_url(), &job);

  let connection = app.connection();
  let progress = app.progress();
  views::draw_status(
    frame,
    chunks[1],
    &StatusPanel {
      job: &job,
      connection: connection.as_ref(),
      progress: progress.as_ref(),
      last_event: app.last_stream_event(),
      monitoring: app.is_monitoring(),
    },
  );

  let error = app.load_error().map(str::to_string);
  let filter = app.filter().value().to_string();
  let (tab, page, page_size, loading) = (app.tab(), app.page(), app.page_size(), app.is_loading());
  let (rows, list_state) = app.rows_and_selection();
  let view = ListView {
    tab,
    page,
    page_size,
    rows,
    loading,
    error: error.as_deref(),
    filter: &filter,
  };
  views::draw_items(frame, chunks[2], &view, list_state);
  app.filter().render_overlay(frame, chunks[2]);

  if log_height > 0 {
    views::draw_logs(frame, chunks[3], &app.logs());
  }

  renderfns::draw_footer(frame, chunks[4], app.notices());
}
