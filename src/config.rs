use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheTtl;
use crate::job::JobOptions;
use crate::poll::DEFAULT_MAX_CONSECUTIVE_ERRORS;
use crate::stream::StreamOptions;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub polling: PollingConfig,
  pub stream: StreamConfig,
  pub job: JobConfig,
  /// Custom title for header (defaults to the service host if not set)
  pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Base URL of the sync service, e.g. "http://localhost:4222"
  pub url: String,
  pub status_path: String,
  pub trigger_path: String,
  /// Job id (or "current") is appended as a path segment
  pub cancel_path: String,
  pub events_path: String,
  /// Paginated resources are fetched from "{resource_prefix}/{resource}"
  pub resource_prefix: String,
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:4222".to_string(),
      status_path: "/api/sync/status/live".to_string(),
      trigger_path: "/api/sync/trigger".to_string(),
      cancel_path: "/api/sync/cancel".to_string(),
      events_path: "/api/events".to_string(),
      resource_prefix: "/api".to_string(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub fresh_ttl_secs: u64,
  pub stale_ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      fresh_ttl_secs: 5 * 60,
      stale_ttl_secs: 30 * 60,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> CacheTtl {
    CacheTtl::new(
      Duration::from_secs(self.fresh_ttl_secs),
      Duration::from_secs(self.stale_ttl_secs),
    )
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
  /// Steady-state live status polling while no job is being monitored
  pub status_interval_ms: u64,
  /// Auto-refresh of the visible item list
  pub items_interval_ms: u64,
  pub max_consecutive_errors: u32,
}

impl Default for PollingConfig {
  fn default() -> Self {
    Self {
      status_interval_ms: 30_000,
      items_interval_ms: 60_000,
      max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
  pub enabled: bool,
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
  pub max_reconnect_attempts: u32,
  /// Pause between disconnect and connect on a manual reconnect
  pub reconnect_delay_ms: u64,
}

impl Default for StreamConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      base_delay_ms: 1_000,
      max_delay_ms: 30_000,
      max_reconnect_attempts: 5,
      reconnect_delay_ms: 1_000,
    }
  }
}

impl StreamConfig {
  pub fn options(&self) -> StreamOptions {
    StreamOptions {
      base_delay: Duration::from_millis(self.base_delay_ms),
      max_delay: Duration::from_millis(self.max_delay_ms),
      max_reconnect_attempts: self.max_reconnect_attempts,
      reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
      ..StreamOptions::default()
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobConfig {
  pub confirm_interval_ms: u64,
  pub confirm_attempts: u32,
  pub monitor_interval_ms: u64,
}

impl Default for JobConfig {
  fn default() -> Self {
    Self {
      confirm_interval_ms: 500,
      confirm_attempts: 10,
      monitor_interval_ms: 2_000,
    }
  }
}

impl JobConfig {
  pub fn options(&self, max_consecutive_errors: u32) -> JobOptions {
    JobOptions {
      confirm_interval: Duration::from_millis(self.confirm_interval_ms),
      confirm_attempts: self.confirm_attempts,
      monitor_interval: Duration::from_millis(self.monitor_interval_ms),
      max_consecutive_errors,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./listsync-dash.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/listsync-dash/config.yaml
  ///
  /// Without any file the defaults are used, which point at a local service.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("listsync-dash.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("listsync-dash").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.cache.fresh_ttl_secs >= config.cache.stale_ttl_secs {
      return Err(eyre!(
        "cache.fresh_ttl_secs ({}) must be shorter than cache.stale_ttl_secs ({})",
        config.cache.fresh_ttl_secs,
        config.cache.stale_ttl_secs
      ));
    }
    Ok(config)
  }

  /// Get the API token from the environment, if one is set.
  ///
  /// Checks LISTSYNC_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("LISTSYNC_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}
