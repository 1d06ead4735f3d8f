//! Long-lived event stream connection with bounded exponential reconnect.

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::job::{JobState, JobUpdate};

use super::sse::{SseDecoder, SseFrame};
use super::types::{ConnectionState, LogEntry, Progress, StreamEvent, StreamStatus};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StreamError {
  #[error("Failed to connect to event stream: {0}")]
  Connect(String),

  #[error("Event stream read failed: {0}")]
  Read(String),

  #[error("Event stream closed by server")]
  Closed,
}

pub type FrameStream = BoxStream<'static, Result<SseFrame, StreamError>>;

/// Something that can open an event stream.
pub trait EventSource: Send + Sync + 'static {
  fn open(&self) -> impl Future<Output = Result<FrameStream, StreamError>> + Send;
}

/// The service's SSE endpoint.
pub struct HttpEventSource {
  client: ApiClient,
}

impl HttpEventSource {
  pub fn new(client: ApiClient) -> Self {
    Self { client }
  }
}

impl EventSource for HttpEventSource {
  async fn open(&self) -> Result<FrameStream, StreamError> {
    let response = self
      .client
      .open_events()
      .await
      .map_err(|e| StreamError::Connect(e.to_string()))?;

    let mut decoder = SseDecoder::default();
    let frames = response.bytes_stream().flat_map(move |chunk| {
      let items: Vec<Result<SseFrame, StreamError>> = match chunk {
        Ok(bytes) => match decoder.feed(&bytes) {
          Ok(frames) => frames.into_iter().map(Ok).collect(),
          Err(e) => vec![Err(e)],
        },
        Err(e) => vec![Err(StreamError::Read(e.to_string()))],
      };
      stream::iter(items)
    });
    Ok(frames.boxed())
  }
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
  pub base_delay: Duration,
  /// Upper bound for a single retry delay
  pub max_delay: Duration,
  pub max_reconnect_attempts: u32,
  /// Pause between disconnect and connect on a manual reconnect
  pub reconnect_delay: Duration,
  /// Number of log entries kept for late subscribers
  pub log_capacity: usize,
}

impl Default for StreamOptions {
  fn default() -> Self {
    Self {
      base_delay: Duration::from_millis(1_000),
      max_delay: Duration::from_millis(30_000),
      max_reconnect_attempts: 5,
      reconnect_delay: Duration::from_secs(1),
      log_capacity: 200,
    }
  }
}

/// Delay before retry number `attempt`: `base * 2^attempt`, capped.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
  let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
  base.saturating_mul(factor).min(cap)
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner<S> {
  source: S,
  options: StreamOptions,
  job: Option<Arc<JobState>>,
  state: watch::Sender<ConnectionState>,
  progress: watch::Sender<Option<Progress>>,
  events: broadcast::Sender<StreamEvent>,
  logs: Mutex<VecDeque<LogEntry>>,
  /// Bumped on every disconnect. A run only writes state while the
  /// generation it was started with is current.
  generation: AtomicU64,
}

impl<S> Inner<S> {
  fn generation(&self) -> u64 {
    self.generation.load(Ordering::SeqCst)
  }

  /// Apply `modify` unless the run at `generation` was disconnected. The
  /// check happens under the state lock, so it cannot interleave with the
  /// reset in `disconnect`.
  fn update_state(&self, generation: u64, modify: impl FnOnce(&mut ConnectionState)) -> bool {
    self.state.send_if_modified(|state| {
      if self.generation() != generation {
        return false;
      }
      modify(state);
      true
    })
  }

  fn set_status(&self, generation: u64, status: StreamStatus) -> bool {
    self.update_state(generation, |state| state.status = status)
  }

  fn on_connected(&self, generation: u64) -> bool {
    let current = self.update_state(generation, |state| {
      state.status = StreamStatus::Connected;
      state.reconnect_attempts = 0;
      state.last_error = None;
    });
    if current {
      info!("Event stream connected");
    }
    current
  }

  /// Record a failure and return the delay before the next attempt, or
  /// `None` once retries are exhausted or the run was disconnected.
  fn on_failure(&self, generation: u64, error: &StreamError) -> Option<Duration> {
    let mut delay = None;
    let mut attempts = 0;
    let current = self.update_state(generation, |state| {
      state.status = StreamStatus::Error;
      state.last_error = Some(error.to_string());
      attempts = state.reconnect_attempts;
      if state.reconnect_attempts >= state.max_reconnect_attempts {
        return;
      }
      state.reconnect_attempts += 1;
      attempts = state.reconnect_attempts;
      delay = Some(backoff_delay(
        state.reconnect_attempts,
        self.options.base_delay,
        self.options.max_delay,
      ));
    });
    if !current {
      return None;
    }

    match delay {
      Some(delay) => warn!(%error, attempts, ?delay, "Event stream failed, scheduling reconnect"),
      None => warn!(%error, attempts, "Event stream failed, giving up"),
    }
    delay
  }

  fn dispatch(&self, frame: &SseFrame) {
    // Stamp on receipt so a poll issued earlier cannot override this status
    let stamp = self.job.as_ref().map(|job| job.stamp());
    let event = StreamEvent::parse(frame);

    match &event {
      StreamEvent::Status(live) => {
        if let (Some(job), Some(stamp)) = (&self.job, stamp) {
          job.apply(stamp, JobUpdate::Observed(live.clone()));
        }
      }
      StreamEvent::Log(entry) => {
        let mut logs = locked(&self.logs);
        while logs.len() >= self.options.log_capacity.max(1) {
          logs.pop_front();
        }
        logs.push_back(entry.clone());
      }
      StreamEvent::Progress(progress) => {
        self.progress.send_replace(Some(progress.clone()));
      }
      StreamEvent::Raw { event, .. } => debug!(event = %event, "Unparseable stream payload"),
      StreamEvent::Message { .. } => {}
    }

    // No subscribers is fine
    let _ = self.events.send(event);
  }
}

async fn run<S: EventSource>(inner: Arc<Inner<S>>, generation: u64) {
  loop {
    if !inner.set_status(generation, StreamStatus::Connecting) {
      return;
    }
    let failure = match inner.source.open().await {
      Ok(mut frames) => {
        if !inner.on_connected(generation) {
          return;
        }
        loop {
          match frames.next().await {
            Some(Ok(_)) if inner.generation() != generation => return,
            Some(Ok(frame)) => inner.dispatch(&frame),
            Some(Err(e)) => break e,
            None => break StreamError::Closed,
          }
        }
      }
      Err(e) => e,
    };

    match inner.on_failure(generation, &failure) {
      Some(delay) => tokio::time::sleep(delay).await,
      None => return,
    }
  }
}

/// Client for the service's event stream. Dropping it disconnects.
pub struct EventStreamClient<S> {
  inner: Arc<Inner<S>>,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl<S> EventStreamClient<S> {
  /// Close the connection and cancel any pending retry. Safe to call any
  /// number of times.
  pub fn disconnect(&self) {
    // An aborted run may still be mid-poll on another worker
    self.inner.generation.fetch_add(1, Ordering::SeqCst);
    if let Some(handle) = locked(&self.task).take() {
      handle.abort();
      debug!("Event stream disconnected");
    }
    self.inner.state.send_if_modified(|state| {
      let reset = ConnectionState {
        max_reconnect_attempts: state.max_reconnect_attempts,
        ..ConnectionState::default()
      };
      if *state == reset {
        return false;
      }
      *state = reset;
      true
    });
  }

  pub fn state(&self) -> ConnectionState {
    self.inner.state.borrow().clone()
  }

  pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
    self.inner.state.subscribe()
  }

  pub fn subscribe_events(&self) -> broadcast::Receiver<StreamEvent> {
    self.inner.events.subscribe()
  }

  pub fn subscribe_progress(&self) -> watch::Receiver<Option<Progress>> {
    self.inner.progress.subscribe()
  }

  /// Latest progress report, if any arrived.
  pub fn progress(&self) -> Option<Progress> {
    self.inner.progress.borrow().clone()
  }

  /// Most recent log entries, oldest first.
  pub fn recent_logs(&self) -> Vec<LogEntry> {
    locked(&self.inner.logs).iter().cloned().collect()
  }
}

impl<S: EventSource> EventStreamClient<S> {
  /// Status messages are written into `job` when one is given.
  pub fn new(source: S, options: StreamOptions, job: Option<Arc<JobState>>) -> Self {
    let (state, _) = watch::channel(ConnectionState {
      max_reconnect_attempts: options.max_reconnect_attempts,
      ..ConnectionState::default()
    });
    let (progress, _) = watch::channel(None);
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    Self {
      inner: Arc::new(Inner {
        source,
        logs: Mutex::new(VecDeque::with_capacity(options.log_capacity)),
        options,
        job,
        state,
        progress,
        events,
        generation: AtomicU64::new(0),
      }),
      task: Mutex::new(None),
    }
  }

  /// Open the stream. No-op while connected or retrying; after retries were
  /// exhausted this starts over with a fresh attempt budget.
  pub fn connect(&self) {
    let mut task = locked(&self.task);
    if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
      return;
    }

    self.inner.state.send_modify(|state| {
      state.reconnect_attempts = 0;
      state.status = StreamStatus::Connecting;
    });
    debug!("Connecting event stream");
    let generation = self.inner.generation();
    *task = Some(tokio::spawn(run(Arc::clone(&self.inner), generation)));
  }

  /// Disconnect, wait the configured delay, connect again.
  pub async fn reconnect(&self) {
    self.disconnect();
    tokio::time::sleep(self.inner.options.reconnect_delay).await;
    self.connect();
  }
}

impl<S> Drop for EventStreamClient<S> {
  fn drop(&mut self) {
    self.disconnect();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::job::JobStatus;
  use tokio::time::Instant;

  enum Attempt {
    Refuse,
    /// Deliver frames then close
    Serve(Vec<SseFrame>),
    /// Deliver frames then stay open
    Hold(Vec<SseFrame>),
  }

  #[derive(Clone, Default)]
  struct ScriptedSource {
    script: Arc<Mutex<VecDeque<Attempt>>>,
    opens: Arc<Mutex<Vec<Instant>>>,
  }

  impl ScriptedSource {
    fn new(script: Vec<Attempt>) -> Self {
      Self {
        script: Arc::new(Mutex::new(script.into())),
        ..Self::default()
      }
    }

    fn opens(&self) -> Vec<Instant> {
      self.opens.lock().unwrap().clone()
    }
  }

  impl EventSource for ScriptedSource {
    async fn open(&self) -> Result<FrameStream, StreamError> {
      self.opens.lock().unwrap().push(Instant::now());
      let next = self.script.lock().unwrap().pop_front();
      match next {
        None | Some(Attempt::Refuse) => Err(StreamError::Connect("connection refused".into())),
        Some(Attempt::Serve(frames)) => Ok(stream::iter(frames.into_iter().map(Ok)).boxed()),
        Some(Attempt::Hold(frames)) => Ok(
          stream::iter(frames.into_iter().map(Ok))
            .chain(stream::pending())
            .boxed(),
        ),
      }
    }
  }

  async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
  }

  #[test]
  fn test_backoff_delays() {
    let base = Duration::from_millis(1_000);
    let cap = Duration::from_millis(30_000);
    let delays: Vec<u128> = (1..=6)
      .map(|n| backoff_delay(n, base, cap).as_millis())
      .collect();
    assert_eq!(delays, vec![2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    assert_eq!(backoff_delay(64, base, cap), cap);
  }

  #[tokio::test(start_paused = true)]
  async fn test_retries_back_off_then_stop() {
    let source = ScriptedSource::new(vec![]);
    let client = EventStreamClient::new(source.clone(), StreamOptions::default(), None);
    let start = Instant::now();
    client.connect();

    sleep_ms(100_000).await;
    let offsets: Vec<u64> = source
      .opens()
      .iter()
      .map(|at| (*at - start).as_millis() as u64)
      .collect();
    assert_eq!(offsets, vec![0, 2_000, 6_000, 14_000, 30_000, 60_000]);

    let state = client.state();
    assert_eq!(state.status, StreamStatus::Error);
    assert_eq!(state.reconnect_attempts, 5);
    assert!(state.is_terminal());
    assert!(state.last_error.is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_attempts_reset_on_connect() {
    let source = ScriptedSource::new(vec![Attempt::Refuse, Attempt::Refuse, Attempt::Hold(vec![])]);
    let client = EventStreamClient::new(source.clone(), StreamOptions::default(), None);
    client.connect();

    sleep_ms(2_500).await;
    assert_eq!(client.state().reconnect_attempts, 2);
    assert_eq!(client.state().status, StreamStatus::Error);

    sleep_ms(4_000).await;
    let state = client.state();
    assert_eq!(state.status, StreamStatus::Connected);
    assert_eq!(state.reconnect_attempts, 0);
    assert_eq!(state.last_error, None);
    assert_eq!(source.opens().len(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_server_close_counts_as_failure() {
    let source = ScriptedSource::new(vec![
      Attempt::Serve(vec![SseFrame::new("log", "Sync finished")]),
      Attempt::Hold(vec![]),
    ]);
    let client = EventStreamClient::new(source.clone(), StreamOptions::default(), None);
    client.connect();

    sleep_ms(100).await;
    let state = client.state();
    assert_eq!(state.status, StreamStatus::Error);
    assert_eq!(state.reconnect_attempts, 1);
    assert_eq!(client.recent_logs().len(), 1);

    sleep_ms(2_000).await;
    assert_eq!(client.state().status, StreamStatus::Connected);
    assert_eq!(source.opens().len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_events_reach_observers() {
    let job = Arc::new(JobState::new());
    let source = ScriptedSource::new(vec![Attempt::Hold(vec![
      SseFrame::new("log", r#"{"level":"info","message":"Processing imdb list"}"#),
      SseFrame::new("progress", r#"{"current":5,"total":10}"#),
      SseFrame::message(r#"{"type":"status","data":{"is_running":true,"status":"running"}}"#),
      SseFrame::message("<html>"),
    ])]);
    let client = EventStreamClient::new(source, StreamOptions::default(), Some(Arc::clone(&job)));
    let mut events = client.subscribe_events();
    let progress = client.subscribe_progress();
    client.connect();

    let mut received = Vec::new();
    for _ in 0..4 {
      received.push(events.recv().await.unwrap());
    }
    assert!(matches!(received[0], StreamEvent::Log(_)));
    assert!(matches!(received[1], StreamEvent::Progress(_)));
    assert!(matches!(received[2], StreamEvent::Status(_)));
    assert_eq!(
      received[3],
      StreamEvent::Raw {
        event: "message".to_string(),
        text: "<html>".to_string(),
      }
    );

    assert_eq!(client.recent_logs()[0].message, "Processing imdb list");
    assert_eq!(progress.borrow().as_ref().map(|p| p.ratio()), Some(0.5));
    let snapshot = job.snapshot();
    assert_eq!(snapshot.status, JobStatus::Running);
    assert!(snapshot.confirmed_running);
  }

  #[tokio::test(start_paused = true)]
  async fn test_log_buffer_is_bounded() {
    let frames = (0..5)
      .map(|n| SseFrame::new("log", format!("line {}", n)))
      .collect();
    let source = ScriptedSource::new(vec![Attempt::Hold(frames)]);
    let options = StreamOptions {
      log_capacity: 3,
      ..StreamOptions::default()
    };
    let client = EventStreamClient::new(source, options, None);
    client.connect();
    sleep_ms(10).await;

    let messages: Vec<String> = client.recent_logs().into_iter().map(|l| l.message).collect();
    assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_connect_and_disconnect_are_idempotent() {
    let source = ScriptedSource::new(vec![Attempt::Hold(vec![]), Attempt::Hold(vec![])]);
    let client = EventStreamClient::new(source.clone(), StreamOptions::default(), None);
    client.connect();
    client.connect();
    sleep_ms(10).await;
    assert_eq!(source.opens().len(), 1);
    assert_eq!(client.state().status, StreamStatus::Connected);

    client.disconnect();
    client.disconnect();
    assert_eq!(client.state().status, StreamStatus::Disconnected);

    client.connect();
    sleep_ms(10).await;
    assert_eq!(source.opens().len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_reconnect_waits_then_connects() {
    let source = ScriptedSource::new(vec![Attempt::Hold(vec![]), Attempt::Hold(vec![])]);
    let client = EventStreamClient::new(source.clone(), StreamOptions::default(), None);
    client.connect();
    sleep_ms(10).await;

    client.reconnect().await;
    sleep_ms(10).await;
    let opens = source.opens();
    assert_eq!(opens.len(), 2);
    assert!(opens[1] - opens[0] >= Duration::from_secs(1));
    assert_eq!(client.state().status, StreamStatus::Connected);
  }

  #[tokio::test(start_paused = true)]
  async fn test_drop_cancels_pending_retry() {
    let source = ScriptedSource::new(vec![]);
    let client = EventStreamClient::new(source.clone(), StreamOptions::default(), None);
    client.connect();
    sleep_ms(100).await;
    drop(client);

    sleep_ms(60_000).await;
    assert_eq!(source.opens().len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_connect_after_exhaustion_starts_over() {
    let options = StreamOptions {
      max_reconnect_attempts: 1,
      ..StreamOptions::default()
    };
    let source = ScriptedSource::new(vec![Attempt::Refuse, Attempt::Refuse, Attempt::Hold(vec![])]);
    let client = EventStreamClient::new(source.clone(), options, None);
    client.connect();
    sleep_ms(5_000).await;
    assert!(client.state().is_terminal());
    assert_eq!(source.opens().len(), 2);

    client.connect();
    sleep_ms(10).await;
    assert_eq!(client.state().status, StreamStatus::Connected);
  }

  #[tokio::test(start_paused = true)]
  async fn test_disconnected_run_cannot_write_state() {
    let source = ScriptedSource::new(vec![Attempt::Hold(vec![])]);
    let client = EventStreamClient::new(source, StreamOptions::default(), None);
    client.connect();
    sleep_ms(10).await;
    assert_eq!(client.state().status, StreamStatus::Connected);

    // Writes an aborted run could still make on another worker
    let stale = client.inner.generation();
    client.disconnect();
    assert!(!client.inner.on_connected(stale));
    assert_eq!(client.inner.on_failure(stale, &StreamError::Closed), None);
    let state = client.state();
    assert_eq!(state.status, StreamStatus::Disconnected);
    assert_eq!(state.reconnect_attempts, 0);
    assert_eq!(state.last_error, None);

    client.connect();
    assert!(client.inner.on_connected(client.inner.generation()));
    assert_eq!(client.state().status, StreamStatus::Connected);
  }
}
