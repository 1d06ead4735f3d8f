//! Serde types matching the sync service's REST responses.

use serde::{Deserialize, Serialize};

// ============================================================================
// Sync status
// ============================================================================

/// Response of the live status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStatus {
  pub is_running: bool,
  #[serde(default)]
  pub status: String,
  #[serde(default)]
  pub last_activity: Option<String>,
  /// Identifier of the running job, when the service reports one
  #[serde(default)]
  pub job_id: Option<String>,
}

/// Which job a cancel request targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelTarget {
  /// Whatever job is running right now
  Current,
  /// A specific job, by the id the service reported
  Job(String),
}

impl CancelTarget {
  /// Path segment sent to the cancel endpoint
  pub fn path_segment(&self) -> &str {
    match self {
      CancelTarget::Current => "current",
      CancelTarget::Job(id) => id,
    }
  }
}

// ============================================================================
// Paginated resources
// ============================================================================

/// One page of a paginated resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
  #[serde(default = "Vec::new")]
  pub items: Vec<T>,
  #[serde(default)]
  pub total: u64,
  #[serde(default)]
  pub page: Option<u32>,
  #[serde(default)]
  pub total_pages: Option<u32>,
}

impl<T> Page<T> {
  /// Number of pages given the requested page size
  pub fn page_count(&self, limit: u32) -> u32 {
    if let Some(pages) = self.total_pages {
      return pages.max(1);
    }
    let limit = u64::from(limit.max(1));
    (self.total.div_ceil(limit)).max(1) as u32
  }
}

/// A media item the service processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
  pub title: String,
  #[serde(default)]
  pub media_type: Option<String>,
  #[serde(default)]
  pub year: Option<u32>,
  /// e.g. "requested", "already_available", "not_found", "error"
  #[serde(default)]
  pub status: Option<String>,
  #[serde(default)]
  pub error_message: Option<String>,
  #[serde(default)]
  pub timestamp: Option<String>,
}

/// A watch-list configured on the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchList {
  #[serde(default)]
  pub id: Option<u64>,
  /// Provider, e.g. "imdb", "trakt", "letterboxd"
  pub list_type: String,
  pub list_id: String,
  #[serde(default)]
  pub item_count: Option<u64>,
  #[serde(default)]
  pub last_synced: Option<String>,
}
