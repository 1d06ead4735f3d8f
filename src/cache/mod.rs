//! In-memory freshness cache for server-derived data.
//!
//! This module provides a stale-while-revalidate cache that:
//! - Keys payloads by a deterministic request fingerprint
//! - Classifies entries as fresh, stale or expired on every read
//! - Serves stale entries immediately while refreshing them in the background
//! - Shares one in-flight load between concurrent requests for the same key
//!
//! Nothing is persisted; the cache lives as long as its owning context.

mod key;
mod layer;
mod traits;

pub use key::ResourceKey;
pub use layer::FreshnessCache;
pub use traits::{CacheError, CacheTtl};
