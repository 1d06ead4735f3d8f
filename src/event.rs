use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::api::{MediaItem, Page, WatchList};
use crate::app::Tab;
use crate::poll::Visibility;

/// A page of whichever resource a tab shows
#[derive(Debug, Clone)]
pub enum Rows {
  Items(Page<MediaItem>),
  Lists(Page<WatchList>),
}

impl Rows {
  pub fn len(&self) -> usize {
    match self {
      Rows::Items(page) => page.items.len(),
      Rows::Lists(page) => page.items.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn page_count(&self, limit: u32) -> u32 {
    match self {
      Rows::Items(page) => page.page_count(limit),
      Rows::Lists(page) => page.page_count(limit),
    }
  }
}

/// Results of background work, sent back to the app loop
#[derive(Debug)]
pub enum DataEvent {
  PageLoaded {
    tab: Tab,
    page: u32,
    result: Result<Rows, String>,
  },
  /// Auto-refresh interval elapsed for the visible list
  RefreshDue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
  Info,
  Error,
}

/// Application events
#[derive(Debug)]
pub enum Event {
  /// Terminal key press
  Key(KeyEvent),
  /// Terminal gained or lost focus
  Focus(Visibility),
  /// Periodic tick for UI refresh
  Tick,
  Data(DataEvent),
  /// Transient message for the footer
  Notice(NoticeLevel, String),
}

/// Event handler that produces events from terminal input and a tick timer
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // crossterm's poll blocks, keep it off the async workers
    let reader = tx.clone();
    tokio::task::spawn_blocking(move || loop {
      let event = match event::poll(tick_rate) {
        Ok(true) => match event::read() {
          Ok(CrosstermEvent::Key(key)) if key.kind == KeyEventKind::Press => Event::Key(key),
          Ok(CrosstermEvent::FocusGained) => Event::Focus(Visibility::Visible),
          Ok(CrosstermEvent::FocusLost) => Event::Focus(Visibility::Hidden),
          Ok(_) => continue,
          Err(_) => break,
        },
        Ok(false) => Event::Tick,
        Err(_) => break,
      };
      if reader.send(event).is_err() {
        break;
      }
    });

    Self { tx, rx }
  }

  /// Sender for background tasks to report back on
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
