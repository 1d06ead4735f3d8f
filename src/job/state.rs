//! Shared, versioned view of the remote sync job.
//!
//! Two writers update the job: status polls issued by the controller and
//! status messages pushed over the event stream. Every write carries a
//! [`Stamp`] taken when its observation began, and a write is only applied if
//! its stamp is newer than the last applied one. A poll that was issued before
//! a pushed status arrived therefore cannot overwrite it when it resolves late.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::trace;

use crate::api::LiveStatus;

/// Client-side lifecycle of the sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobStatus {
  #[default]
  Idle,
  Running,
  /// Cancel accepted, waiting for the job to report stopped
  Stopping,
  /// Cancel accepted but the job still reported running when the
  /// confirmation window closed
  StopUnconfirmed,
  /// The status endpoint could not be reached
  Error,
}

impl JobStatus {
  pub fn label(&self) -> &'static str {
    match self {
      JobStatus::Idle => "idle",
      JobStatus::Running => "running",
      JobStatus::Stopping => "stopping",
      JobStatus::StopUnconfirmed => "stop unconfirmed",
      JobStatus::Error => "error",
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncJob {
  /// Optimistic flag, flipped locally on trigger and stop
  pub is_running: bool,
  /// What the service last reported
  pub confirmed_running: bool,
  pub status: JobStatus,
  /// A cancel was accepted and the service has not yet reported the job
  /// stopped. Survives failed status reads.
  pub stop_pending: bool,
  /// Raw status string reported by the service
  pub remote_status: Option<String>,
  /// Id of the running job, if the service reports one
  pub job_id: Option<String>,
  pub last_known_activity: Option<String>,
  pub last_fetched_at: Option<DateTime<Utc>>,
  pub last_error: Option<String>,
}

/// A write to the job state.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
  /// A live status read, from a poll or a pushed message
  Observed(LiveStatus),
  /// The status endpoint failed
  Unreachable(String),
  /// A sync request was accepted
  Triggered,
  /// A cancel is about to be sent
  StopRequested,
  /// The cancel request itself failed
  StopFailed,
  /// The confirmation window closed while the job still reported running
  StopUnconfirmed,
}

impl SyncJob {
  fn apply(&mut self, update: JobUpdate) {
    match update {
      JobUpdate::Observed(live) => {
        self.confirmed_running = live.is_running;
        self.remote_status = Some(live.status).filter(|s| !s.is_empty());
        if live.last_activity.is_some() {
          self.last_known_activity = live.last_activity;
        }
        self.last_fetched_at = Some(Utc::now());
        self.last_error = None;

        if live.job_id.is_some() || !live.is_running {
          self.job_id = live.job_id;
        }

        if !live.is_running {
          self.is_running = false;
          self.stop_pending = false;
          self.status = JobStatus::Idle;
        } else if self.stop_pending {
          if self.status != JobStatus::StopUnconfirmed {
            self.status = JobStatus::Stopping;
          }
        } else {
          self.is_running = true;
          self.status = JobStatus::Running;
        }
      }
      JobUpdate::Unreachable(error) => {
        // Fail closed: an unreachable service is treated as not running
        self.is_running = false;
        self.confirmed_running = false;
        self.status = JobStatus::Error;
        self.last_error = Some(error);
      }
      JobUpdate::Triggered => {
        self.is_running = true;
        self.stop_pending = false;
        self.status = JobStatus::Running;
        self.last_error = None;
      }
      JobUpdate::StopRequested => {
        self.is_running = false;
        self.stop_pending = true;
        self.status = JobStatus::Stopping;
      }
      JobUpdate::StopFailed => {
        if self.stop_pending {
          self.stop_pending = false;
          self.is_running = true;
          self.status = JobStatus::Running;
        }
      }
      JobUpdate::StopUnconfirmed => {
        if self.stop_pending {
          self.status = JobStatus::StopUnconfirmed;
        }
      }
    }
  }
}

/// Monotonic write stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stamp(u64);

struct Versioned {
  applied: Stamp,
  job: SyncJob,
}

/// Process-wide job state. Observers subscribe to snapshots.
pub struct JobState {
  next: AtomicU64,
  inner: Mutex<Versioned>,
  tx: watch::Sender<SyncJob>,
}

impl JobState {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(SyncJob::default());
    Self {
      next: AtomicU64::new(1),
      inner: Mutex::new(Versioned {
        applied: Stamp(0),
        job: SyncJob::default(),
      }),
      tx,
    }
  }

  fn lock(&self) -> MutexGuard<'_, Versioned> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Take a stamp for an observation that is about to begin.
  pub fn stamp(&self) -> Stamp {
    Stamp(self.next.fetch_add(1, Ordering::SeqCst))
  }

  /// Apply a write if it is newer than everything applied so far.
  ///
  /// Returns whether the write was applied.
  pub fn apply(&self, stamp: Stamp, update: JobUpdate) -> bool {
    let mut inner = self.lock();
    if stamp <= inner.applied {
      trace!(?stamp, applied = ?inner.applied, ?update, "Dropping out-of-date job update");
      return false;
    }
    inner.applied = stamp;
    inner.job.apply(update);
    self.tx.send_replace(inner.job.clone());
    true
  }

  /// Stamp and apply in one step, for writes that observe nothing remote.
  pub fn apply_now(&self, update: JobUpdate) -> bool {
    let stamp = self.stamp();
    self.apply(stamp, update)
  }

  pub fn snapshot(&self) -> SyncJob {
    self.lock().job.clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<SyncJob> {
    self.tx.subscribe()
  }

  /// Forget everything, e.g. when switching to another service.
  pub fn reset(&self) {
    let mut inner = self.lock();
    inner.applied = self.stamp();
    inner.job = SyncJob::default();
    self.tx.send_replace(inner.job.clone());
  }
}

impl Default for JobState {
  fn default() -> Self {
    Self::new()
  }
}
