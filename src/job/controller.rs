//! Drives sync job requests and tracks the job until it is confirmed stopped.
//!
//! The service only offers "request cancellation" and "poll current status",
//! so after a cancel is accepted the controller polls rapidly for a short
//! window to confirm the stop, then falls back to normal-cadence monitoring.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{CancelTarget, LiveStatus, SyncApi};
use crate::poll::{PollOptions, PollTask, Visibility, DEFAULT_MAX_CONSECUTIVE_ERRORS};

use super::state::{JobState, JobStatus, JobUpdate};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum JobError {
  #[error("Cannot trigger sync: a sync is already in progress")]
  AlreadyRunning,

  #[error("Cannot stop sync: no sync is running")]
  NotRunning,

  #[error("Failed to fetch sync status: {0}")]
  Status(String),

  #[error("Failed to trigger sync: {0}")]
  Trigger(String),

  #[error("Failed to cancel sync: {0}")]
  Cancel(String),
}

#[derive(Debug, Clone)]
pub struct JobOptions {
  /// Spacing of confirmation polls after a cancel
  pub confirm_interval: Duration,
  pub confirm_attempts: u32,
  /// Cadence of steady-state monitoring of a running job
  pub monitor_interval: Duration,
  pub max_consecutive_errors: u32,
}

impl Default for JobOptions {
  fn default() -> Self {
    Self {
      confirm_interval: Duration::from_millis(500),
      confirm_attempts: 10,
      monitor_interval: Duration::from_secs(2),
      max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
    }
  }
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
  /// The job reported not running within the confirmation window
  Confirmed,
  /// Still running after the window; normal monitoring took over
  Unconfirmed,
}

/// Status reads shared by the controller, its monitor and its confirmation
/// task. Holds no task handles so it can be captured by them freely.
struct StatusReader<A> {
  api: Arc<A>,
  job: Arc<JobState>,
}

impl<A> Clone for StatusReader<A> {
  fn clone(&self) -> Self {
    Self {
      api: Arc::clone(&self.api),
      job: Arc::clone(&self.job),
    }
  }
}

impl<A: SyncApi> StatusReader<A> {
  async fn fetch(&self) -> Result<LiveStatus, JobError> {
    let stamp = self.job.stamp();
    match self.api.live_status().await {
      Ok(live) => {
        self.job.apply(stamp, JobUpdate::Observed(live.clone()));
        Ok(live)
      }
      Err(e) => {
        let message = e.to_string();
        warn!(error = %message, "Failed to fetch live sync status");
        self.job.apply(stamp, JobUpdate::Unreachable(message.clone()));
        Err(JobError::Status(message))
      }
    }
  }
}

/// Owns the lifecycle of the remote sync job. Clones share all state.
pub struct JobController<A> {
  reader: StatusReader<A>,
  options: JobOptions,
  visibility: Option<watch::Receiver<Visibility>>,
  monitor: Arc<Mutex<Option<PollTask>>>,
  confirmation: Arc<Mutex<Option<JoinHandle<StopOutcome>>>>,
}

impl<A> Clone for JobController<A> {
  fn clone(&self) -> Self {
    Self {
      reader: self.reader.clone(),
      options: self.options.clone(),
      visibility: self.visibility.clone(),
      monitor: Arc::clone(&self.monitor),
      confirmation: Arc::clone(&self.confirmation),
    }
  }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<A: SyncApi> JobController<A> {
  pub fn new(api: Arc<A>, job: Arc<JobState>, options: JobOptions) -> Self {
    Self {
      reader: StatusReader { api, job },
      options,
      visibility: None,
      monitor: Arc::new(Mutex::new(None)),
      confirmation: Arc::new(Mutex::new(None)),
    }
  }

  /// Pause monitoring while the terminal is hidden.
  pub fn with_visibility(mut self, visibility: watch::Receiver<Visibility>) -> Self {
    self.visibility = Some(visibility);
    self
  }

  pub fn job(&self) -> &Arc<JobState> {
    &self.reader.job
  }

  /// Read the live status and record it. On failure the job is marked as
  /// errored and not running.
  pub async fn fetch_live_status(&self) -> Result<LiveStatus, JobError> {
    self.reader.fetch().await
  }

  /// Ask the service to start a sync.
  pub async fn trigger_sync(&self) -> Result<(), JobError> {
    if self.job().snapshot().is_running {
      return Err(JobError::AlreadyRunning);
    }

    self
      .reader
      .api
      .trigger_sync()
      .await
      .map_err(|e| JobError::Trigger(e.to_string()))?;

    // A local decision, so it outranks any status read still in flight.
    // The job may not have started processing yet; assume it did.
    self.job().apply_now(JobUpdate::Triggered);
    info!("Sync triggered");
    self.start_monitoring();
    Ok(())
  }

  /// Ask the service to cancel the running sync.
  ///
  /// The job is marked as stopping before the request is sent. Returns once
  /// the request is accepted; confirmation continues in the background.
  pub async fn stop_sync(&self) -> Result<(), JobError> {
    let job = self.job().snapshot();
    if job.status != JobStatus::Running {
      return Err(JobError::NotRunning);
    }
    let target = job.job_id.map_or(CancelTarget::Current, CancelTarget::Job);

    self.job().apply_now(JobUpdate::StopRequested);
    info!(?target, "Requesting sync cancellation");

    if let Err(e) = self.reader.api.cancel_sync(target).await {
      warn!(error = %e, "Cancel request failed");
      self.job().apply_now(JobUpdate::StopFailed);
      let _ = self.fetch_live_status().await;
      return Err(JobError::Cancel(e.to_string()));
    }

    let controller = self.clone();
    let handle = tokio::spawn(async move { controller.confirm_stopped().await });
    if let Some(previous) = locked(&self.confirmation).replace(handle) {
      previous.abort();
    }
    Ok(())
  }

  /// Poll rapidly until the job reports stopped or the window closes.
  async fn confirm_stopped(&self) -> StopOutcome {
    for attempt in 1..=self.options.confirm_attempts {
      tokio::time::sleep(self.options.confirm_interval).await;
      match self.fetch_live_status().await {
        Ok(live) if !live.is_running => {
          info!(attempt, "Sync stop confirmed");
          return StopOutcome::Confirmed;
        }
        Ok(_) => debug!(attempt, "Sync still running after cancel"),
        Err(e) => debug!(attempt, error = %e, "Confirmation poll failed"),
      }
    }

    warn!(
      attempts = self.options.confirm_attempts,
      "Sync still reported running after cancel, falling back to monitoring"
    );
    self.job().apply_now(JobUpdate::StopUnconfirmed);
    self.start_monitoring();
    StopOutcome::Unconfirmed
  }

  /// Wait for a pending stop confirmation, if any.
  pub async fn wait_for_stop(&self) -> Option<StopOutcome> {
    let handle = locked(&self.confirmation).take()?;
    handle.await.ok()
  }

  /// Poll live status at the monitoring cadence until the job is neither
  /// running locally nor reported running. No-op while already monitoring.
  pub fn start_monitoring(&self) {
    let mut monitor = locked(&self.monitor);
    if monitor.as_ref().is_some_and(|task| task.is_polling()) {
      return;
    }

    let reader = self.reader.clone();
    let options = PollOptions {
      interval: self.options.monitor_interval,
      immediate: false,
      pause_when_hidden: true,
      max_consecutive_errors: self.options.max_consecutive_errors,
    };
    let mut task = PollTask::new("sync-monitor", options, move || {
      let reader = reader.clone();
      async move {
        reader
          .fetch()
          .await
          .map_err(|e| color_eyre::eyre::eyre!(e))?;
        let job = reader.job.snapshot();
        if job.is_running || job.confirmed_running {
          Ok(ControlFlow::Continue(()))
        } else {
          debug!("Sync no longer running, monitoring finished");
          Ok(ControlFlow::Break(()))
        }
      }
    });
    if let Some(visibility) = &self.visibility {
      task = task.with_visibility(visibility.clone());
    }
    task.start();
    *monitor = Some(task);
  }

  pub fn stop_monitoring(&self) {
    if let Some(mut task) = locked(&self.monitor).take() {
      task.stop();
    }
  }

  pub fn is_monitoring(&self) -> bool {
    locked(&self.monitor)
      .as_ref()
      .is_some_and(|task| task.is_polling())
  }

  /// Stop all background work owned by the controller.
  pub fn shutdown(&self) {
    self.stop_monitoring();
    if let Some(handle) = locked(&self.confirmation).take() {
      handle.abort();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
  use tokio::sync::Notify;

  #[derive(Default)]
  struct FakeApi {
    running: AtomicBool,
    unreachable: AtomicBool,
    reject_cancel: AtomicBool,
    status_calls: AtomicU32,
    trigger_calls: AtomicU32,
    cancel_calls: AtomicU32,
    cancel_gate: Option<Notify>,
    trigger_gate: Option<Notify>,
    job_id: Option<String>,
    cancelled: Mutex<Vec<CancelTarget>>,
  }

  impl FakeApi {
    fn running() -> Self {
      let api = Self::default();
      api.running.store(true, Ordering::SeqCst);
      api
    }

    fn status_calls(&self) -> u32 {
      self.status_calls.load(Ordering::SeqCst)
    }
  }

  impl SyncApi for FakeApi {
    async fn live_status(&self) -> color_eyre::Result<LiveStatus> {
      self.status_calls.fetch_add(1, Ordering::SeqCst);
      if self.unreachable.load(Ordering::SeqCst) {
        return Err(eyre!("connection refused"));
      }
      let is_running = self.running.load(Ordering::SeqCst);
      Ok(LiveStatus {
        is_running,
        status: if is_running { "running" } else { "idle" }.to_string(),
        last_activity: None,
        job_id: self.job_id.clone().filter(|_| is_running),
      })
    }

    async fn trigger_sync(&self) -> color_eyre::Result<()> {
      self.trigger_calls.fetch_add(1, Ordering::SeqCst);
      if let Some(gate) = &self.trigger_gate {
        gate.notified().await;
      }
      self.running.store(true, Ordering::SeqCst);
      Ok(())
    }

    async fn cancel_sync(&self, target: CancelTarget) -> color_eyre::Result<()> {
      locked(&self.cancelled).push(target);
      self.cancel_calls.fetch_add(1, Ordering::SeqCst);
      if let Some(gate) = &self.cancel_gate {
        gate.notified().await;
      }
      if self.reject_cancel.load(Ordering::SeqCst) {
        return Err(eyre!("500 Internal Server Error"));
      }
      Ok(())
    }
  }

  fn controller(api: FakeApi) -> (Arc<FakeApi>, JobController<FakeApi>) {
    let api = Arc::new(api);
    let controller = JobController::new(
      Arc::clone(&api),
      Arc::new(JobState::new()),
      JobOptions::default(),
    );
    (api, controller)
  }

  async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_fetch_failure_fails_closed_and_recovers() {
    let (api, controller) = controller(FakeApi::running());
    controller.fetch_live_status().await.unwrap();
    assert_eq!(controller.job().snapshot().status, JobStatus::Running);

    api.unreachable.store(true, Ordering::SeqCst);
    let err = controller.fetch_live_status().await.unwrap_err();
    assert!(matches!(err, JobError::Status(_)));
    let job = controller.job().snapshot();
    assert_eq!(job.status, JobStatus::Error);
    assert!(!job.is_running);
    assert!(job.last_error.is_some());

    api.unreachable.store(false, Ordering::SeqCst);
    api.running.store(false, Ordering::SeqCst);
    controller.fetch_live_status().await.unwrap();
    assert_eq!(controller.job().snapshot().status, JobStatus::Idle);
  }

  #[tokio::test(start_paused = true)]
  async fn test_trigger_rejected_while_running() {
    let (api, controller) = controller(FakeApi::running());
    controller.fetch_live_status().await.unwrap();

    let err = controller.trigger_sync().await.unwrap_err();
    assert_eq!(err, JobError::AlreadyRunning);
    assert_eq!(api.trigger_calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_trigger_marks_running_and_monitors() {
    let (api, controller) = controller(FakeApi::default());
    controller.trigger_sync().await.unwrap();

    let job = controller.job().snapshot();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.is_running);
    assert!(controller.is_monitoring());

    // Job finishes on the service; the monitor notices and stops itself
    api.running.store(false, Ordering::SeqCst);
    sleep_ms(2_100).await;
    assert_eq!(controller.job().snapshot().status, JobStatus::Idle);
    assert!(!controller.is_monitoring());
  }

  #[tokio::test(start_paused = true)]
  async fn test_trigger_outranks_status_read_in_flight() {
    let api = FakeApi {
      trigger_gate: Some(Notify::new()),
      ..FakeApi::default()
    };
    let (api, controller) = controller(api);

    let pending = {
      let controller = controller.clone();
      tokio::spawn(async move { controller.trigger_sync().await })
    };
    sleep_ms(10).await;
    assert_eq!(api.trigger_calls.load(Ordering::SeqCst), 1);

    // A status read issued while the trigger is outstanding still sees idle
    controller.fetch_live_status().await.unwrap();
    assert_eq!(controller.job().snapshot().status, JobStatus::Idle);

    api.trigger_gate.as_ref().unwrap().notify_one();
    pending.await.unwrap().unwrap();

    let job = controller.job().snapshot();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.is_running);
    controller.shutdown();
  }

  #[tokio::test(start_paused = true)]
  async fn test_stop_rejected_while_idle() {
    let (api, controller) = controller(FakeApi::default());
    let err = controller.stop_sync().await.unwrap_err();
    assert_eq!(err, JobError::NotRunning);
    assert_eq!(api.cancel_calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_stop_marks_stopping_before_response() {
    let api = FakeApi {
      cancel_gate: Some(Notify::new()),
      ..FakeApi::running()
    };
    let (api, controller) = controller(api);
    controller.fetch_live_status().await.unwrap();

    let pending = {
      let controller = controller.clone();
      tokio::spawn(async move { controller.stop_sync().await })
    };
    sleep_ms(10).await;

    assert_eq!(api.cancel_calls.load(Ordering::SeqCst), 1);
    let job = controller.job().snapshot();
    assert_eq!(job.status, JobStatus::Stopping);
    assert!(!job.is_running);

    api.cancel_gate.as_ref().unwrap().notify_one();
    pending.await.unwrap().unwrap();
    controller.shutdown();
  }

  #[tokio::test(start_paused = true)]
  async fn test_stop_confirmed_by_poll() {
    let (api, controller) = controller(FakeApi::running());
    controller.fetch_live_status().await.unwrap();
    let polls_before = api.status_calls();

    controller.stop_sync().await.unwrap();
    assert_eq!(controller.job().snapshot().status, JobStatus::Stopping);

    // Two confirmation polls still see the job running
    sleep_ms(1_200).await;
    assert_eq!(api.status_calls() - polls_before, 2);
    assert_eq!(controller.job().snapshot().status, JobStatus::Stopping);

    api.running.store(false, Ordering::SeqCst);
    assert_eq!(controller.wait_for_stop().await, Some(StopOutcome::Confirmed));
    assert_eq!(api.status_calls() - polls_before, 3);
    assert_eq!(controller.job().snapshot().status, JobStatus::Idle);
  }

  #[tokio::test(start_paused = true)]
  async fn test_stop_falls_back_after_ten_attempts() {
    let (api, controller) = controller(FakeApi::running());
    controller.fetch_live_status().await.unwrap();
    let polls_before = api.status_calls();

    controller.stop_sync().await.unwrap();
    assert_eq!(
      controller.wait_for_stop().await,
      Some(StopOutcome::Unconfirmed)
    );
    assert_eq!(api.status_calls() - polls_before, 10);

    let job = controller.job().snapshot();
    assert_eq!(job.status, JobStatus::StopUnconfirmed);
    assert!(job.last_error.is_none());
    assert!(controller.is_monitoring());

    // Normal-cadence monitoring picks up the eventual stop
    api.running.store(false, Ordering::SeqCst);
    sleep_ms(2_100).await;
    assert_eq!(api.status_calls() - polls_before, 11);
    assert_eq!(controller.job().snapshot().status, JobStatus::Idle);
    assert!(!controller.is_monitoring());
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_confirmation_poll_keeps_stop_pending() {
    let (api, controller) = controller(FakeApi::running());
    controller.fetch_live_status().await.unwrap();
    controller.stop_sync().await.unwrap();

    // First confirmation poll at 500ms sees the job running
    sleep_ms(700).await;
    assert_eq!(controller.job().snapshot().status, JobStatus::Stopping);

    // Second one at 1s cannot reach the service
    api.unreachable.store(true, Ordering::SeqCst);
    sleep_ms(500).await;
    assert_eq!(controller.job().snapshot().status, JobStatus::Error);

    // Service is back and the job still runs: the stop is still pending
    api.unreachable.store(false, Ordering::SeqCst);
    sleep_ms(500).await;
    let job = controller.job().snapshot();
    assert_eq!(job.status, JobStatus::Stopping);
    assert!(!job.is_running);

    assert_eq!(
      controller.wait_for_stop().await,
      Some(StopOutcome::Unconfirmed)
    );
    assert_eq!(controller.job().snapshot().status, JobStatus::StopUnconfirmed);
    controller.shutdown();
  }

  #[tokio::test(start_paused = true)]
  async fn test_stop_targets_reported_job() {
    let api = FakeApi {
      job_id: Some("run-42".to_string()),
      ..FakeApi::running()
    };
    let (api, controller) = controller(api);

    // Without a status read the id is unknown
    controller.job().apply_now(JobUpdate::Triggered);
    controller.stop_sync().await.unwrap();
    controller.shutdown();
    controller.job().apply_now(JobUpdate::StopFailed);

    controller.fetch_live_status().await.unwrap();
    assert_eq!(controller.job().snapshot().job_id.as_deref(), Some("run-42"));
    controller.stop_sync().await.unwrap();
    controller.shutdown();

    assert_eq!(
      *locked(&api.cancelled),
      vec![CancelTarget::Current, CancelTarget::Job("run-42".to_string())]
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_rejected_cancel_restores_running() {
    let api = FakeApi::running();
    api.reject_cancel.store(true, Ordering::SeqCst);
    let (_api, controller) = controller(api);
    controller.fetch_live_status().await.unwrap();

    let err = controller.stop_sync().await.unwrap_err();
    assert!(matches!(err, JobError::Cancel(_)));
    let job = controller.job().snapshot();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.is_running);
    assert_eq!(controller.wait_for_stop().await, None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_monitoring_is_idempotent() {
    let (api, controller) = controller(FakeApi::running());
    controller.fetch_live_status().await.unwrap();
    let polls_before = api.status_calls();

    controller.start_monitoring();
    controller.start_monitoring();
    sleep_ms(4_100).await;
    assert_eq!(api.status_calls() - polls_before, 2);

    controller.stop_monitoring();
    sleep_ms(4_000).await;
    assert_eq!(api.status_calls() - polls_before, 2);
  }
}
