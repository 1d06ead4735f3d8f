//! Request fingerprints used as cache keys.

use sha2::{Digest, Sha256};

/// A logical request that can be cached.
pub trait QueryKey {
  /// Stable fingerprint for the request
  fn cache_key(&self) -> String;

  /// Human-readable description for logs
  fn description(&self) -> String;

  /// Resource the request belongs to, used for bulk invalidation
  fn resource(&self) -> &str;
}

/// A paginated resource request, e.g. `GET /api/processed?page=1&limit=50`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceKey {
  pub resource: String,
  pub page: u32,
  pub limit: u32,
  /// Optional free-text filter passed along with the request
  pub filter: Option<String>,
}

impl ResourceKey {
  pub fn new(resource: impl Into<String>, page: u32, limit: u32) -> Self {
    Self {
      resource: resource.into(),
      page,
      limit,
      filter: None,
    }
  }

  pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
    let filter = filter.into();
    self.filter = if filter.trim().is_empty() {
      None
    } else {
      Some(filter)
    };
    self
  }
}

impl QueryKey for ResourceKey {
  fn cache_key(&self) -> String {
    let base = format!("{}_p{}_l{}", self.resource, self.page, self.limit);
    match &self.filter {
      Some(filter) => format!("{}_{}", base, filter_digest(filter)),
      None => base,
    }
  }

  fn description(&self) -> String {
    match &self.filter {
      Some(filter) => format!(
        "{} page {} ({} per page) matching '{}'",
        self.resource, self.page, self.limit, filter
      ),
      None => format!(
        "{} page {} ({} per page)",
        self.resource, self.page, self.limit
      ),
    }
  }

  fn resource(&self) -> &str {
    &self.resource
  }
}

/// Short SHA256 digest of a normalized filter string.
fn filter_digest(filter: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(normalize_filter(filter).as_bytes());
  let digest = hex::encode(hasher.finalize());
  digest[..12].to_string()
}

/// Trims whitespace and lowercases so equivalent filters share an entry.
fn normalize_filter(filter: &str) -> String {
  filter.trim().to_lowercase()
}
