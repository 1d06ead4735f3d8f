//! The explicitly constructed set of client-side state a dashboard session
//! works against.

use color_eyre::{eyre::eyre, Result};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::api::{ApiClient, MediaItem, Page, WatchList};
use crate::cache::{CacheError, FreshnessCache, ResourceKey};
use crate::config::{Config, PollingConfig};
use crate::job::{JobController, JobState};
use crate::poll::{PollOptions, PollTask, Visibility};
use crate::stream::{EventStreamClient, HttpEventSource};

/// Resource that holds watch lists rather than media items
pub const LISTS_RESOURCE: &str = "lists";

/// Caches, job state, controller and stream for one service.
///
/// Views receive the context instead of reaching for globals, and tests build
/// isolated instances. Dropping the context tears everything down.
pub struct SyncContext {
  pub api: ApiClient,
  pub items: FreshnessCache<Page<MediaItem>>,
  pub lists: FreshnessCache<Page<WatchList>>,
  pub job: Arc<JobState>,
  pub controller: JobController<ApiClient>,
  pub stream: Option<EventStreamClient<HttpEventSource>>,
  visibility: watch::Sender<Visibility>,
  polling: PollingConfig,
}

impl SyncContext {
  pub fn new(config: &Config) -> Result<Self> {
    let api = ApiClient::new(&config.api)?;
    let ttl = config.cache.ttl();
    let job = Arc::new(JobState::new());
    let (visibility, visibility_rx) = watch::channel(Visibility::Visible);

    let controller = JobController::new(
      Arc::new(api.clone()),
      Arc::clone(&job),
      config.job.options(config.polling.max_consecutive_errors),
    )
    .with_visibility(visibility_rx);

    let stream = config.stream.enabled.then(|| {
      EventStreamClient::new(
        HttpEventSource::new(api.clone()),
        config.stream.options(),
        Some(Arc::clone(&job)),
      )
    });

    Ok(Self {
      api,
      items: FreshnessCache::new(ttl),
      lists: FreshnessCache::new(ttl),
      job,
      controller,
      stream,
      visibility,
      polling: config.polling.clone(),
    })
  }

  pub fn visibility(&self) -> watch::Receiver<Visibility> {
    self.visibility.subscribe()
  }

  pub fn set_visibility(&self, visibility: Visibility) {
    self.visibility.send_if_modified(|current| {
      if *current == visibility {
        return false;
      }
      debug!(?visibility, "Visibility changed");
      *current = visibility;
      true
    });
  }

  /// One page of media items, e.g. the "failed" resource.
  pub async fn fetch_items(
    &self,
    resource: &str,
    page: u32,
    limit: u32,
    filter: Option<&str>,
  ) -> Result<Page<MediaItem>, CacheError> {
    let key = ResourceKey::new(resource, page, limit).with_filter(filter.unwrap_or_default());
    let api = self.api.clone();
    let resource = resource.to_string();
    let search = key.filter.clone();
    self
      .items
      .fetch(&key, move || async move {
        api.get_page(&resource, page, limit, search.as_deref()).await
      })
      .await
  }

  pub async fn fetch_lists(&self, page: u32, limit: u32) -> Result<Page<WatchList>, CacheError> {
    let key = ResourceKey::new(LISTS_RESOURCE, page, limit);
    let api = self.api.clone();
    self
      .lists
      .fetch(&key, move || async move {
        api.get_page(LISTS_RESOURCE, page, limit, None).await
      })
      .await
  }

  /// Drop cached pages of a resource so the next fetch goes to the network.
  pub fn invalidate(&self, resource: &str) {
    if resource == LISTS_RESOURCE {
      self.lists.invalidate_resource(resource);
    } else {
      self.items.invalidate_resource(resource);
    }
  }

  /// Steady-state live status polling. Hands over to the controller's
  /// faster monitoring whenever the service reports a running job.
  pub fn status_poller(&self) -> PollTask {
    let controller = self.controller.clone();
    let options = PollOptions {
      max_consecutive_errors: self.polling.max_consecutive_errors,
      ..PollOptions::every(Duration::from_millis(self.polling.status_interval_ms))
    };

    PollTask::new("live-status", options, move || {
      let controller = controller.clone();
      async move {
        controller
          .fetch_live_status()
          .await
          .map_err(|e| eyre!(e))?;
        if controller.job().snapshot().confirmed_running {
          controller.start_monitoring();
        }
        Ok(ControlFlow::Continue(()))
      }
    })
    .with_visibility(self.visibility())
  }

  pub fn connect_stream(&self) {
    if let Some(stream) = &self.stream {
      stream.connect();
    }
  }

  /// Clear caches, disconnect the stream and stop all job tracking.
  pub fn teardown(&self) {
    self.items.clear();
    self.lists.clear();
    if let Some(stream) = &self.stream {
      stream.disconnect();
    }
    self.controller.shutdown();
    self.job.reset();
  }
}

impl Drop for SyncContext {
  fn drop(&mut self) {
    self.teardown();
  }
}
