//! Stale-while-revalidate cache layer in front of the HTTP loaders.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::key::QueryKey;
use super::traits::{CacheEntry, CacheError, CacheTier, CacheTtl};

type LoadFuture<T> = Shared<BoxFuture<'static, Result<T, CacheError>>>;

/// A stored payload.
struct Slot<T> {
  payload: T,
  fetched_at: Instant,
  resource: String,
}

/// A load that has been started and not yet resolved.
struct InFlight<T> {
  id: u64,
  resource: String,
  future: LoadFuture<T>,
}

/// Identifies which invalidation epoch a load was started in. A load may only
/// write its result if nothing invalidated its key in the meantime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
  epoch: u64,
  resource_generation: u64,
}

struct State<T> {
  entries: HashMap<String, Slot<T>>,
  in_flight: HashMap<String, InFlight<T>>,
  generations: HashMap<String, u64>,
  epoch: u64,
  next_load_id: u64,
}

impl<T: Clone> State<T> {
  fn new() -> Self {
    Self {
      entries: HashMap::new(),
      in_flight: HashMap::new(),
      generations: HashMap::new(),
      epoch: 0,
      next_load_id: 0,
    }
  }

  fn ticket(&self, resource: &str) -> Ticket {
    Ticket {
      epoch: self.epoch,
      resource_generation: self.generations.get(resource).copied().unwrap_or(0),
    }
  }

  /// Read an entry, evicting it when it has expired.
  fn read(&mut self, key: &str, now: Instant, ttl: &CacheTtl) -> Option<CacheEntry<T>> {
    let slot = self.entries.get(key)?;
    let tier = CacheTier::for_age(now.saturating_duration_since(slot.fetched_at), ttl);
    if tier == CacheTier::Expired {
      self.entries.remove(key);
      return None;
    }
    Some(CacheEntry {
      key: key.to_string(),
      payload: slot.payload.clone(),
      fetched_at: slot.fetched_at,
      tier,
    })
  }
}

/// Keyed freshness cache.
///
/// `fetch` is the entry point views use:
/// - fresh entries are returned without calling the loader
/// - stale entries are returned immediately while one background refresh runs
/// - missing or expired entries are loaded in the foreground
///
/// Concurrent loads of the same key share a single loader future.
pub struct FreshnessCache<T> {
  state: Arc<Mutex<State<T>>>,
  ttl: CacheTtl,
}

impl<T> FreshnessCache<T>
where
  T: Clone + Send + Sync + 'static,
{
  pub fn new(ttl: CacheTtl) -> Self {
    Self {
      state: Arc::new(Mutex::new(State::new())),
      ttl,
    }
  }

  pub fn ttl(&self) -> CacheTtl {
    self.ttl
  }

  fn lock(&self) -> MutexGuard<'_, State<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Look up an entry without ever touching the network.
  pub fn get<K: QueryKey>(&self, key: &K) -> Option<CacheEntry<T>> {
    let cache_key = key.cache_key();
    self.lock().read(&cache_key, Instant::now(), &self.ttl)
  }

  /// Fetch through the cache.
  ///
  /// Errors from a foreground load are returned; errors from a background
  /// refresh are logged and the stale entry stays in place.
  pub async fn fetch<K, F, Fut>(&self, key: &K, loader: F) -> Result<T, CacheError>
  where
    K: QueryKey,
    F: FnOnce() -> Fut,
    Fut: Future<Output = color_eyre::Result<T>> + Send + 'static,
  {
    let cache_key = key.cache_key();

    let (stale, load) = {
      let mut state = self.lock();
      match state.read(&cache_key, Instant::now(), &self.ttl) {
        Some(entry) if entry.tier == CacheTier::Fresh => return Ok(entry.payload),
        Some(entry) => {
          let load = self.start_load(&mut state, key.resource(), &cache_key, loader);
          (Some(entry.payload), load)
        }
        None => {
          let load = self.start_load(&mut state, key.resource(), &cache_key, loader);
          (None, load)
        }
      }
    };

    match stale {
      Some(payload) => {
        debug!(key = %cache_key, "Serving stale entry, refreshing in background");
        tokio::spawn(async move {
          if let Err(e) = load.await {
            warn!(error = %e, "Background refresh failed, keeping stale entry");
          }
        });
        Ok(payload)
      }
      None => {
        debug!(query = %key.description(), "Cache miss, loading");
        load.await
      }
    }
  }

  /// Join an existing load for the key or start a new one.
  fn start_load<F, Fut>(
    &self,
    state: &mut State<T>,
    resource: &str,
    cache_key: &str,
    loader: F,
  ) -> LoadFuture<T>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = color_eyre::Result<T>> + Send + 'static,
  {
    if let Some(existing) = state.in_flight.get(cache_key) {
      return existing.future.clone();
    }

    let id = state.next_load_id;
    state.next_load_id += 1;
    let ticket = state.ticket(resource);

    let shared = Arc::clone(&self.state);
    let key = cache_key.to_string();
    let owner = resource.to_string();
    let request = loader();

    let future = async move {
      let result = request.await;
      complete_load(&shared, id, ticket, key, owner, result)
    }
    .boxed()
    .shared();

    state.in_flight.insert(
      cache_key.to_string(),
      InFlight {
        id,
        resource: resource.to_string(),
        future: future.clone(),
      },
    );
    future
  }

  /// Drop a single entry.
  pub fn invalidate<K: QueryKey>(&self, key: &K) {
    let cache_key = key.cache_key();
    let mut state = self.lock();
    state.entries.remove(&cache_key);
    let resource = key.resource().to_string();
    *state.generations.entry(resource).or_insert(0) += 1;
    state.in_flight.remove(&cache_key);
  }

  /// Drop every entry of a resource, e.g. after a list was modified.
  pub fn invalidate_resource(&self, resource: &str) {
    let mut state = self.lock();
    state.entries.retain(|_, slot| slot.resource != resource);
    *state.generations.entry(resource.to_string()).or_insert(0) += 1;
    state.in_flight.retain(|_, load| load.resource != resource);
    debug!(resource, "Invalidated cached resource");
  }

  /// Drop everything. Loads started before the clear will not be written.
  pub fn clear(&self) {
    let mut state = self.lock();
    state.entries.clear();
    state.in_flight.clear();
    state.epoch += 1;
    debug!("Cleared freshness cache");
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn in_flight(&self) -> usize {
    self.lock().in_flight.len()
  }
}

/// Write a finished load into the cache and unregister it.
fn complete_load<T: Clone>(
  state: &Mutex<State<T>>,
  id: u64,
  ticket: Ticket,
  key: String,
  resource: String,
  result: color_eyre::Result<T>,
) -> Result<T, CacheError> {
  let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);

  if state.in_flight.get(&key).is_some_and(|f| f.id == id) {
    state.in_flight.remove(&key);
  }

  match result {
    Ok(payload) => {
      if state.ticket(&resource) == ticket {
        state.entries.insert(
          key,
          Slot {
            payload: payload.clone(),
            fetched_at: Instant::now(),
            resource,
          },
        );
      } else {
        debug!(key = %key, "Discarding load that finished after invalidation");
      }
      Ok(payload)
    }
    Err(e) => Err(CacheError::Load {
      key,
      message: e.to_string(),
    }),
  }
}

impl<T> Clone for FreshnessCache<T> {
  fn clone(&self) -> Self {
    Self {
      state: Arc::clone(&self.state),
      ttl: self.ttl,
    }
  }
}
