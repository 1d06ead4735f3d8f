//! Core types for the freshness cache.

use std::time::Duration;
use tokio::time::Instant;

/// Freshness tier of a cached payload, derived from its age on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
  /// Younger than the fresh TTL; served without touching the network
  Fresh,
  /// Between the fresh and stale TTL; served while a refresh runs
  Stale,
  /// Older than the stale TTL; treated as a miss and evicted
  Expired,
}

impl CacheTier {
  /// Classify an entry of the given age.
  pub fn for_age(age: Duration, ttl: &CacheTtl) -> Self {
    if age <= ttl.fresh {
      CacheTier::Fresh
    } else if age <= ttl.stale {
      CacheTier::Stale
    } else {
      CacheTier::Expired
    }
  }
}

/// The two freshness thresholds. `fresh` must be shorter than `stale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtl {
  pub fresh: Duration,
  pub stale: Duration,
}

impl CacheTtl {
  pub fn new(fresh: Duration, stale: Duration) -> Self {
    // Keep the ordering invariant even for odd configs
    let stale = stale.max(fresh);
    Self { fresh, stale }
  }
}

impl Default for CacheTtl {
  fn default() -> Self {
    Self {
      fresh: Duration::from_secs(5 * 60),
      stale: Duration::from_secs(30 * 60),
    }
  }
}

/// A cached payload as seen by a reader.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  /// Fingerprint of the request that produced the payload
  pub key: String,
  pub payload: T,
  /// When the payload was written
  pub fetched_at: Instant,
  /// Tier at the moment of the read
  pub tier: CacheTier,
}

/// Errors surfaced by foreground cache loads.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
  #[error("Failed to load {key}: {message}")]
  Load { key: String, message: String },
}
