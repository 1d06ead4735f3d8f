use crate::config::Config;
use crate::context::{SyncContext, LISTS_RESOURCE};
use crate::event::{DataEvent, Event, EventHandler, NoticeLevel, Rows};
use crate::job::{JobStatus, SyncJob};
use crate::poll::{PollOptions, PollTask};
use crate::prefs::{PrefsStore, UiPrefs};
use crate::stream::{ConnectionState, LogEntry, Progress, StreamEvent, StreamStatus};
use crate::ui::{self, FilterEvent, FilterInput, KeyResult};
use color_eyre::Result;
use crossterm::event::{
  DisableFocusChange, EnableFocusChange, KeyCode, KeyEvent, KeyModifiers,
};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use ratatui::widgets::ListState;
use std::collections::VecDeque;
use std::io::stdout;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long a notice stays in the footer
const NOTICE_TTL: Duration = Duration::from_secs(5);
const MAX_NOTICES: usize = 3;

/// The lists the dashboard can show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
  #[default]
  Processed,
  Failed,
  Successful,
  Lists,
}

impl Tab {
  pub const ALL: [Tab; 4] = [Tab::Processed, Tab::Failed, Tab::Successful, Tab::Lists];

  /// Resource name the tab is fetched from
  pub fn resource(&self) -> &'static str {
    match self {
      Tab::Processed => "processed",
      Tab::Failed => "failed",
      Tab::Successful => "successful",
      Tab::Lists => LISTS_RESOURCE,
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      Tab::Processed => "Processed",
      Tab::Failed => "Failed",
      Tab::Successful => "Successful",
      Tab::Lists => "Lists",
    }
  }

  pub fn index(&self) -> usize {
    Self::ALL.iter().position(|t| t == self).unwrap_or(0)
  }

  pub fn next(&self) -> Self {
    Self::ALL[(self.index() + 1) % Self::ALL.len()]
  }

  pub fn previous(&self) -> Self {
    Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
  }
}

#[derive(Debug, Clone)]
pub struct Notice {
  pub level: NoticeLevel,
  pub message: String,
  pub expires_at: Instant,
}

/// Drop expired notices and keep only the newest few.
fn prune_notices(notices: &mut VecDeque<Notice>, now: Instant) {
  notices.retain(|n| n.expires_at > now);
  while notices.len() > MAX_NOTICES {
    notices.pop_front();
  }
}

/// Main application state
pub struct App {
  config: Config,
  ctx: Arc<SyncContext>,

  prefs: UiPrefs,
  prefs_store: Option<PrefsStore>,

  tab: Tab,
  page: u32,
  rows: Option<Rows>,
  loading: bool,
  load_error: Option<String>,
  list_state: ListState,
  filter: FilterInput,

  notices: VecDeque<Notice>,
  last_job_status: JobStatus,
  last_stream_status: StreamStatus,
  last_stream_event: Option<(String, Instant)>,

  status_poller: PollTask,
  refresh_poller: Option<PollTask>,
  stream_events: Option<broadcast::Receiver<StreamEvent>>,

  /// Event sender for async tasks
  event_tx: mpsc::UnboundedSender<Event>,

  should_quit: bool,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    // Preferences are a convenience; run without them if the store is unusable
    let prefs_store = match PrefsStore::open() {
      Ok(store) => Some(store),
      Err(e) => {
        warn!(error = %e, "Preferences unavailable, using defaults");
        None
      }
    };
    Self::with_prefs_store(config, prefs_store)
  }

  fn with_prefs_store(config: Config, prefs_store: Option<PrefsStore>) -> Result<Self> {
    let ctx = Arc::new(SyncContext::new(&config)?);
    let prefs = prefs_store
      .as_ref()
      .and_then(|store| store.load().ok())
      .unwrap_or_default();

    let status_poller = ctx.status_poller();
    let stream_events = ctx.stream.as_ref().map(|s| s.subscribe_events());
    let (tx, _rx) = mpsc::unbounded_channel();

    Ok(Self {
      config,
      ctx,
      prefs,
      prefs_store,
      tab: Tab::default(),
      page: 1,
      rows: None,
      loading: false,
      load_error: None,
      list_state: ListState::default(),
      filter: FilterInput::new(),
      notices: VecDeque::new(),
      last_job_status: JobStatus::Idle,
      last_stream_status: StreamStatus::Disconnected,
      last_stream_event: None,
      status_poller,
      refresh_poller: None,
      stream_events,
      event_tx: tx,
      should_quit: false,
    })
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    stdout().execute(EnableFocusChange)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut events = EventHandler::new(Duration::from_millis(250));
    self.event_tx = events.sender();

    info!(service = %self.ctx.api.host(), "Dashboard started");
    self.status_poller.start();
    self.ctx.connect_stream();
    self.set_auto_refresh(self.prefs.auto_refresh);
    self.load_page();

    let result = self.event_loop(&mut terminal, &mut events).await;

    self.status_poller.stop();
    self.refresh_poller = None;
    self.ctx.teardown();

    // Cleanup terminal
    stdout().execute(DisableFocusChange)?;
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
  }

  async fn event_loop<B: Backend>(
    &mut self,
    terminal: &mut Terminal<B>,
    events: &mut EventHandler,
  ) -> Result<()> {
    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      match events.next().await {
        Some(event) => self.handle_event(event),
        None => break,
      }
    }
    Ok(())
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Focus(visibility) => self.ctx.set_visibility(visibility),
      Event::Tick => self.tick(),
      Event::Data(data) => self.handle_data(data),
      Event::Notice(level, message) => self.notify(level, message),
    }
  }

  fn tick(&mut self) {
    prune_notices(&mut self.notices, Instant::now());
    self.drain_stream_events();

    // A finished sync means new rows on the service
    let status = self.ctx.job.snapshot().status;
    let was_active = matches!(
      self.last_job_status,
      JobStatus::Running | JobStatus::Stopping | JobStatus::StopUnconfirmed
    );
    if was_active && status == JobStatus::Idle {
      debug!("Sync finished, refreshing visible list");
      self.ctx.invalidate(self.tab.resource());
      self.load_page();
    }
    self.last_job_status = status;

    if let Some(conn) = self.connection() {
      if conn.status == StreamStatus::Error && self.last_stream_status != StreamStatus::Error {
        let message = match (conn.is_terminal(), conn.last_error) {
          (true, _) => "Event stream unavailable, press c to reconnect".to_string(),
          (false, Some(e)) => e,
          (false, None) => "Event stream failed".to_string(),
        };
        self.notify(NoticeLevel::Error, message);
      }
      self.last_stream_status = conn.status;
    }
  }

  fn drain_stream_events(&mut self) {
    let Some(rx) = self.stream_events.as_mut() else {
      return;
    };
    loop {
      match rx.try_recv() {
        Ok(event) => {
          let kind = match &event {
            StreamEvent::Status(_) => "status".to_string(),
            StreamEvent::Log(_) => "log".to_string(),
            StreamEvent::Progress(_) => "progress".to_string(),
            StreamEvent::Message { kind, .. } => kind.clone(),
            StreamEvent::Raw { event, .. } => event.clone(),
          };
          self.last_stream_event = Some((kind, Instant::now()));
        }
        Err(TryRecvError::Lagged(skipped)) => {
          debug!(skipped, "Dashboard fell behind the event stream");
        }
        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
      }
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    match self.filter.handle_key(key) {
      KeyResult::Handled => return,
      KeyResult::Event(FilterEvent::Applied) => {
        self.page = 1;
        self.load_page();
        return;
      }
      KeyResult::Event(FilterEvent::Cleared) => {
        self.page = 1;
        self.load_page();
        return;
      }
      KeyResult::NotHandled => {}
    }

    match key.code {
      KeyCode::Char('q') => self.should_quit = true,
      KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.should_quit = true;
      }

      // Job
      KeyCode::Char('s') => self.trigger_sync(),
      KeyCode::Char('x') => self.stop_sync(),

      // Lists
      KeyCode::Tab => self.switch_tab(self.tab.next()),
      KeyCode::BackTab => self.switch_tab(self.tab.previous()),
      KeyCode::Char('n') | KeyCode::Right => self.change_page(1),
      KeyCode::Char('p') | KeyCode::Left => self.change_page(-1),
      KeyCode::Char('j') | KeyCode::Down => self.list_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.list_state.select_previous(),
      KeyCode::Char('r') => {
        self.ctx.invalidate(self.tab.resource());
        self.load_page();
      }

      // Preferences
      KeyCode::Char('l') => {
        self.prefs.show_logs = !self.prefs.show_logs;
        self.save_prefs();
      }
      KeyCode::Char('a') => {
        self.prefs.auto_refresh = !self.prefs.auto_refresh;
        self.set_auto_refresh(self.prefs.auto_refresh);
        self.save_prefs();
      }

      KeyCode::Char('c') => self.reconnect_stream(),
      _ => {}
    }
  }

  fn switch_tab(&mut self, tab: Tab) {
    if tab == self.tab {
      return;
    }
    self.tab = tab;
    self.page = 1;
    self.rows = None;
    self.list_state = ListState::default();
    self.load_page();
  }

  fn change_page(&mut self, delta: i64) {
    let pages = self
      .rows
      .as_ref()
      .map(|rows| rows.page_count(self.prefs.page_size))
      .unwrap_or(1);
    let target = (i64::from(self.page) + delta).clamp(1, i64::from(pages)) as u32;
    if target != self.page {
      self.page = target;
      self.list_state = ListState::default();
      self.load_page();
    }
  }

  /// Load the visible page through the cache. Fresh pages come back without a
  /// request; stale pages come back at once and refresh in the background.
  fn load_page(&mut self) {
    let ctx = Arc::clone(&self.ctx);
    let tx = self.event_tx.clone();
    let tab = self.tab;
    let page = self.page;
    let limit = self.prefs.page_size.max(1);
    let filter = Some(self.filter.value().to_string()).filter(|f| !f.is_empty());
    self.loading = true;

    tokio::spawn(async move {
      let result = match tab {
        Tab::Lists => ctx.fetch_lists(page, limit).await.map(Rows::Lists),
        _ => ctx
          .fetch_items(tab.resource(), page, limit, filter.as_deref())
          .await
          .map(Rows::Items),
      };
      let _ = tx.send(Event::Data(DataEvent::PageLoaded {
        tab,
        page,
        result: result.map_err(|e| e.to_string()),
      }));
    });
  }

  fn handle_data(&mut self, event: DataEvent) {
    match event {
      DataEvent::PageLoaded { tab, page, result } => {
        // A response for a page that is no longer visible
        if tab != self.tab || page != self.page {
          return;
        }
        self.loading = false;
        match result {
          Ok(rows) => {
            self.rows = Some(rows);
            self.load_error = None;
          }
          Err(e) => {
            self.notify(NoticeLevel::Error, e.clone());
            self.load_error = Some(e);
          }
        }
      }
      // Read through the cache: fresh pages cost nothing, stale ones are
      // shown at once and revalidated in the background
      DataEvent::RefreshDue => self.load_page(),
    }
  }

  fn set_auto_refresh(&mut self, enabled: bool) {
    if !enabled {
      self.refresh_poller = None;
      return;
    }
    if self.refresh_poller.as_ref().is_some_and(|p| p.is_polling()) {
      return;
    }

    let tx = self.event_tx.clone();
    let interval = Duration::from_millis(self.config.polling.items_interval_ms);
    let mut poller = PollTask::new(
      "list-refresh",
      PollOptions::every(interval).immediate(false),
      move || {
        let sent = tx.send(Event::Data(DataEvent::RefreshDue));
        async move {
          match sent {
            Ok(()) => Ok(ControlFlow::Continue(())),
            // App is gone
            Err(_) => Ok(ControlFlow::Break(())),
          }
        }
      },
    )
    .with_visibility(self.ctx.visibility());
    poller.start();
    self.refresh_poller = Some(poller);
  }

  fn trigger_sync(&self) {
    let ctx = Arc::clone(&self.ctx);
    let tx = self.event_tx.clone();
    tokio::spawn(async move {
      let notice = match ctx.controller.trigger_sync().await {
        Ok(()) => Event::Notice(NoticeLevel::Info, "Sync triggered".to_string()),
        Err(e) => Event::Notice(NoticeLevel::Error, e.to_string()),
      };
      let _ = tx.send(notice);
    });
  }

  fn stop_sync(&self) {
    let ctx = Arc::clone(&self.ctx);
    let tx = self.event_tx.clone();
    tokio::spawn(async move {
      let notice = match ctx.controller.stop_sync().await {
        Ok(()) => Event::Notice(NoticeLevel::Info, "Stop requested".to_string()),
        Err(e) => Event::Notice(NoticeLevel::Error, e.to_string()),
      };
      let _ = tx.send(notice);
    });
  }

  fn reconnect_stream(&mut self) {
    if self.ctx.stream.is_none() {
      self.notify(NoticeLevel::Info, "Event stream is disabled".to_string());
      return;
    }
    let ctx = Arc::clone(&self.ctx);
    tokio::spawn(async move {
      if let Some(stream) = &ctx.stream {
        stream.reconnect().await;
      }
    });
    self.notify(NoticeLevel::Info, "Reconnecting event stream".to_string());
  }

  fn save_prefs(&mut self) {
    let Some(store) = &self.prefs_store else {
      return;
    };
    if let Err(e) = store.save(&self.prefs) {
      warn!(error = %e, "Failed to save preferences");
      self.notify(NoticeLevel::Error, "Failed to save preferences".to_string());
    }
  }

  fn notify(&mut self, level: NoticeLevel, message: String) {
    self.notices.push_back(Notice {
      level,
      message,
      expires_at: Instant::now() + NOTICE_TTL,
    });
    prune_notices(&mut self.notices, Instant::now());
  }

  // Accessors for UI rendering
  pub fn title(&self) -> String {
    self
      .config
      .title
      .clone()
      .unwrap_or_else(|| self.ctx.api.host())
  }

  pub fn service_url(&self) -> &str {
    &self.config.api.url
  }

  pub fn job(&self) -> SyncJob {
    self.ctx.job.snapshot()
  }

  pub fn connection(&self) -> Option<ConnectionState> {
    self.ctx.stream.as_ref().map(|s| s.state())
  }

  pub fn progress(&self) -> Option<Progress> {
    self
      .ctx
      .stream
      .as_ref()
      .and_then(|s| s.progress())
  }

  pub fn logs(&self) -> Vec<LogEntry> {
    self
      .ctx
      .stream
      .as_ref()
      .map(|s| s.recent_logs())
      .unwrap_or_default()
  }

  pub fn last_stream_event(&self) -> Option<&(String, Instant)> {
    self.last_stream_event.as_ref()
  }

  pub fn is_monitoring(&self) -> bool {
    self.ctx.controller.is_monitoring()
  }

  pub fn tab(&self) -> Tab {
    self.tab
  }

  pub fn page(&self) -> u32 {
    self.page
  }

  pub fn page_size(&self) -> u32 {
    self.prefs.page_size
  }

  /// Rows together with the selection, borrowed at once for rendering
  pub fn rows_and_selection(&mut self) -> (Option<&Rows>, &mut ListState) {
    (self.rows.as_ref(), &mut self.list_state)
  }

  pub fn is_loading(&self) -> bool {
    self.loading
  }

  pub fn load_error(&self) -> Option<&str> {
    self.load_error.as_deref()
  }

  pub fn filter(&self) -> &FilterInput {
    &self.filter
  }

  pub fn prefs(&self) -> &UiPrefs {
    &self.prefs
  }

  pub fn notices(&self) -> impl Iterator<Item = &Notice> {
    self.notices.iter()
  }
}
