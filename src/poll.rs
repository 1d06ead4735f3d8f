//! Repeating task driver that follows terminal visibility.
//!
//! A [`PollTask`] invokes its callback on a fixed cadence. While the terminal
//! is hidden (lost focus) ticks are skipped without resetting the cadence, and
//! regaining visibility fires one catch-up invocation immediately. A task that
//! fails too many times in a row stops itself and stays stopped until its
//! owner calls [`PollTask::start`] again.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Default number of consecutive failures before a task stops itself
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Whether the dashboard is currently visible to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
  #[default]
  Visible,
  Hidden,
}

/// Outcome of one callback invocation. `Break` stops the task cleanly.
pub type PollResult = color_eyre::Result<ControlFlow<()>>;

type PollCallback = Arc<dyn Fn() -> BoxFuture<'static, PollResult> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PollOptions {
  pub interval: Duration,
  /// Fire once as soon as the task starts
  pub immediate: bool,
  /// Skip ticks while the terminal is hidden
  pub pause_when_hidden: bool,
  pub max_consecutive_errors: u32,
}

impl PollOptions {
  pub fn every(interval: Duration) -> Self {
    Self {
      interval,
      ..Self::default()
    }
  }

  pub fn immediate(mut self, immediate: bool) -> Self {
    self.immediate = immediate;
    self
  }

  pub fn pause_when_hidden(mut self, pause: bool) -> Self {
    self.pause_when_hidden = pause;
    self
  }
}

impl Default for PollOptions {
  fn default() -> Self {
    Self {
      interval: Duration::from_secs(30),
      immediate: true,
      pause_when_hidden: true,
      max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
    }
  }
}

/// Snapshot of a task's bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStatus {
  pub is_polling: bool,
  pub is_paused: bool,
  pub last_poll_at: Option<Instant>,
  pub consecutive_errors: u32,
}

struct Shared {
  name: String,
  options: PollOptions,
  callback: PollCallback,
  status: Mutex<PollStatus>,
  wake: Notify,
}

impl Shared {
  fn status(&self) -> MutexGuard<'_, PollStatus> {
    self.status.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn pause(&self) {
    let mut status = self.status();
    if status.is_polling && !status.is_paused {
      trace!(task = %self.name, "Pausing poll task");
      status.is_paused = true;
    }
  }

  fn resume(&self) {
    let mut status = self.status();
    if !status.is_polling {
      return;
    }
    status.is_paused = false;
    drop(status);
    trace!(task = %self.name, "Resuming poll task");
    self.wake.notify_one();
  }

  async fn run_once(&self) -> ControlFlow<()> {
    self.status().last_poll_at = Some(Instant::now());
    let result = (self.callback)().await;

    let mut status = self.status();
    match result {
      Ok(ControlFlow::Continue(())) => {
        status.consecutive_errors = 0;
        ControlFlow::Continue(())
      }
      Ok(ControlFlow::Break(())) => {
        status.consecutive_errors = 0;
        status.is_polling = false;
        debug!(task = %self.name, "Poll task finished");
        ControlFlow::Break(())
      }
      Err(e) => {
        status.consecutive_errors += 1;
        warn!(
          task = %self.name,
          errors = status.consecutive_errors,
          error = %e,
          "Poll callback failed"
        );
        if status.consecutive_errors >= self.options.max_consecutive_errors {
          status.is_polling = false;
          status.is_paused = false;
          warn!(task = %self.name, "Too many consecutive failures, stopping poll task");
          ControlFlow::Break(())
        } else {
          ControlFlow::Continue(())
        }
      }
    }
  }
}

/// A repeating task. Dropping the task stops it.
pub struct PollTask {
  shared: Arc<Shared>,
  visibility: Option<watch::Receiver<Visibility>>,
  driver: Option<JoinHandle<()>>,
}

impl PollTask {
  pub fn new<F, Fut>(name: impl Into<String>, options: PollOptions, callback: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PollResult> + Send + 'static,
  {
    let callback: PollCallback = Arc::new(move || callback().boxed());
    Self {
      shared: Arc::new(Shared {
        name: name.into(),
        options,
        callback,
        status: Mutex::new(PollStatus::default()),
        wake: Notify::new(),
      }),
      visibility: None,
      driver: None,
    }
  }

  /// Follow a visibility signal. Ignored unless `pause_when_hidden` is set.
  pub fn with_visibility(mut self, visibility: watch::Receiver<Visibility>) -> Self {
    if self.shared.options.pause_when_hidden {
      self.visibility = Some(visibility);
    }
    self
  }

  /// Start polling. No-op while already polling.
  pub fn start(&mut self) {
    if self.driver.as_ref().is_some_and(|h| !h.is_finished()) {
      return;
    }

    let mut visibility = self.visibility.clone();
    let hidden = visibility
      .as_mut()
      .map(|rx| *rx.borrow_and_update() == Visibility::Hidden)
      .unwrap_or(false);

    {
      let mut status = self.shared.status();
      status.is_polling = true;
      status.is_paused = hidden;
      status.consecutive_errors = 0;
    }

    debug!(task = %self.shared.name, interval = ?self.shared.options.interval, "Starting poll task");
    let shared = Arc::clone(&self.shared);
    self.driver = Some(tokio::spawn(drive(shared, visibility)));
  }

  /// Stop polling. Safe to call any number of times.
  pub fn stop(&mut self) {
    if let Some(handle) = self.driver.take() {
      handle.abort();
    }
    let mut status = self.shared.status();
    if status.is_polling {
      debug!(task = %self.shared.name, "Stopping poll task");
    }
    status.is_polling = false;
    status.is_paused = false;
  }

  /// Skip upcoming ticks without changing the cadence.
  pub fn pause(&self) {
    self.shared.pause();
  }

  /// Stop skipping ticks and fire one invocation right away.
  pub fn resume(&self) {
    self.shared.resume();
  }

  pub fn status(&self) -> PollStatus {
    self.shared.status().clone()
  }

  pub fn is_polling(&self) -> bool {
    self.shared.status().is_polling
  }
}

impl Drop for PollTask {
  fn drop(&mut self) {
    self.stop();
  }
}

async fn drive(shared: Arc<Shared>, mut visibility: Option<watch::Receiver<Visibility>>) {
  let period = shared.options.interval;
  let mut ticker = interval_at(Instant::now() + period, period);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  let paused = shared.status().is_paused;
  if shared.options.immediate && !paused && shared.run_once().await.is_break() {
    return;
  }

  loop {
    tokio::select! {
      _ = ticker.tick() => {
        if shared.status().is_paused {
          trace!(task = %shared.name, "Skipping tick while hidden");
          continue;
        }
      }
      _ = shared.wake.notified() => {}
      change = next_visibility(&mut visibility) => {
        match change {
          Some(Visibility::Hidden) => shared.pause(),
          Some(Visibility::Visible) => shared.resume(),
          None => visibility = None,
        }
        continue;
      }
    }

    if shared.run_once().await.is_break() {
      return;
    }
  }
}

/// Wait for the next visibility transition. Never resolves without a signal.
async fn next_visibility(rx: &mut Option<watch::Receiver<Visibility>>) -> Option<Visibility> {
  match rx {
    Some(rx) => match rx.changed().await {
      Ok(()) => Some(*rx.borrow_and_update()),
      Err(_) => None,
    },
    None => std::future::pending().await,
  }
}
