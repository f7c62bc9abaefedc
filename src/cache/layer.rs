//! Response cache with stale-while-revalidate reads and fetch coalescing.

use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::entry::{AnyData, CacheEntry, SharedFetch};
use super::traits::{
  CacheEvent, CacheEventKind, CacheResult, CacheStatus, QueryKey, ReadOptions, SubscriptionId,
};
use crate::error::ApiError;

type Callback = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

struct Subscriber {
  key: String,
  callback: Callback,
}

#[derive(Default)]
struct Shared {
  entries: Mutex<HashMap<String, CacheEntry>>,
  subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
  next_subscription: AtomicU64,
  next_generation: AtomicU64,
}

impl Shared {
  fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn subscribers(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Subscriber>> {
    self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Deliver events to subscribers. Must be called without the entries lock.
  fn notify(&self, events: Vec<CacheEvent>) {
    for event in events {
      let callbacks: Vec<Callback> = self
        .subscribers()
        .values()
        .filter(|s| s.key == event.key)
        .map(|s| Arc::clone(&s.callback))
        .collect();
      for callback in callbacks {
        callback(&event);
      }
    }
  }

  /// Record the outcome of fetch `generation` for `key`.
  fn settle(
    &self,
    key: &str,
    generation: u64,
    result: &Result<AnyData, ApiError>,
    options: ReadOptions,
  ) {
    let event = {
      let mut entries = self.entries();
      let Some(entry) = entries.get_mut(key) else {
        debug!(key, "Dropping result for evicted entry");
        return;
      };
      if entry.generation != generation {
        debug!(key, "Dropping result from superseded fetch");
        return;
      }

      entry.in_flight = None;
      let now = Instant::now();

      let kind = match result {
        Ok(data) => {
          entry.data = Some(Arc::clone(data));
          entry.status = CacheStatus::Success;
          entry.error = None;
          entry.fetched_at = Some(now);
          entry.stale_at = Some(now + options.stale_time);
          entry.expires_at = Some(now + options.cache_time);
          if generation > entry.invalidated_at {
            entry.invalidated = false;
          }
          debug!(key = %entry.description, "Cache updated");
          CacheEventKind::Updated
        }
        Err(ApiError::Cancelled) => {
          if entry.data.is_none() {
            entry.status = if entry.error.is_some() {
              CacheStatus::Error
            } else {
              CacheStatus::Idle
            };
          }
          debug!(key = %entry.description, "Fetch cancelled, keeping previous state");
          return;
        }
        Err(err) => {
          entry.status = CacheStatus::Error;
          entry.error = Some(err.clone());
          if generation > entry.invalidated_at {
            entry.invalidated = false;
          }
          entry.expires_at = entry.expires_at.or(Some(now + options.cache_time));
          debug!(key = %entry.description, error = %err, "Fetch failed");
          CacheEventKind::Failed
        }
      };
      kind.into_event(key, entry.status)
    };

    self.notify(vec![event]);
  }
}

impl CacheEventKind {
  fn into_event(self, key: &str, status: CacheStatus) -> CacheEvent {
    CacheEvent {
      key: key.to_string(),
      kind: self,
      status,
    }
  }
}

/// In-memory response cache keyed by [`QueryKey`].
///
/// Entries hold type-erased data so one cache serves every resource; a read
/// whose type does not match the stored value is treated as a miss.
/// Cloning is cheap and clones share the same entries.
#[derive(Clone, Default)]
pub struct ResponseCache {
  shared: Arc<Shared>,
}

impl ResponseCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Read `key`, starting a fetch when needed.
  ///
  /// - fresh data: returned as is, no fetch
  /// - stale or invalidated data: returned as is, one background refetch
  /// - missing or expired: `Loading` with no data, fetch started
  /// - failed: last error and any earlier data, no fetch until `refetch`
  ///
  /// A fetch already in flight for the key is joined instead of duplicated.
  /// `fetcher` only builds the future and must not touch this cache. Fetches
  /// are spawned on the current tokio runtime.
  pub fn read<K, T, F, Fut>(&self, key: &K, fetcher: F, options: ReadOptions) -> CacheResult<T>
  where
    K: QueryKey + ?Sized,
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    self.ensure(key, fetcher, options, false).0
  }

  /// Like [`read`](Self::read) but always fetches unless one is already in flight.
  pub fn refetch<K, T, F, Fut>(&self, key: &K, fetcher: F, options: ReadOptions) -> CacheResult<T>
  where
    K: QueryKey + ?Sized,
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    self.ensure(key, fetcher, options, true).0
  }

  /// Resolve `key` to data, waiting for a fetch when there is nothing fresh.
  ///
  /// When a revalidation fails but older data exists, the older data is
  /// returned (the entry still records the error).
  pub async fn fetch<K, T, F, Fut>(
    &self,
    key: &K,
    fetcher: F,
    options: ReadOptions,
  ) -> Result<Arc<T>, ApiError>
  where
    K: QueryKey + ?Sized,
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let (snapshot, in_flight) = self.ensure(key, fetcher, options, false);

    match (in_flight, snapshot.data) {
      (Some(pending), stale) if stale.is_none() || snapshot.is_stale => {
        match pending.await {
          Ok(data) => downcast(data),
          Err(err) if err.is_cancelled() => Err(err),
          Err(err) => stale.ok_or(err),
        }
      }
      (_, Some(data)) => Ok(data),
      (_, None) => Err(snapshot.error.unwrap_or(ApiError::Cancelled)),
    }
  }

  /// Peek at `key` without fetching.
  pub fn peek<K, T>(&self, key: &K) -> Option<CacheResult<T>>
  where
    K: QueryKey + ?Sized,
    T: Send + Sync + 'static,
  {
    let now = Instant::now();
    self
      .shared
      .entries()
      .get(&key.cache_hash())
      .map(|entry| entry.snapshot(now))
  }

  /// Force the next access to `key` to revalidate.
  pub fn invalidate<K: QueryKey + ?Sized>(&self, key: &K) -> bool {
    let hash = key.cache_hash();
    let event = {
      let mut entries = self.shared.entries();
      let Some(entry) = entries.get_mut(&hash) else {
        return false;
      };
      entry.invalidate();
      CacheEventKind::Invalidated.into_event(&hash, entry.status)
    };
    self.shared.notify(vec![event]);
    true
  }

  /// Invalidate every key whose hash starts with `prefix`.
  pub fn invalidate_prefix(&self, prefix: &str) -> usize {
    let events: Vec<CacheEvent> = {
      let mut entries = self.shared.entries();
      entries
        .iter_mut()
        .filter(|(hash, _)| hash.starts_with(prefix))
        .map(|(hash, entry)| {
          entry.invalidate();
          CacheEventKind::Invalidated.into_event(hash, entry.status)
        })
        .collect()
    };
    let count = events.len();
    self.shared.notify(events);
    count
  }

  /// Drop `key` entirely. A fetch still in flight for it settles into nothing.
  pub fn remove<K: QueryKey + ?Sized>(&self, key: &K) -> bool {
    self.shared.entries().remove(&key.cache_hash()).is_some()
  }

  /// Drop entries not accessed for longer than their cache time.
  pub fn evict_expired(&self) -> usize {
    let now = Instant::now();
    let mut entries = self.shared.entries();
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_evictable(now));
    let evicted = before - entries.len();
    if evicted > 0 {
      debug!(evicted, "Evicted idle cache entries");
    }
    evicted
  }

  /// Periodically evict idle entries until every handle to the cache is gone.
  pub fn spawn_janitor(&self, period: Duration) -> JoinHandle<()> {
    let weak: Weak<Shared> = Arc::downgrade(&self.shared);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      ticker.tick().await;
      loop {
        ticker.tick().await;
        let Some(shared) = weak.upgrade() else {
          break;
        };
        ResponseCache { shared }.evict_expired();
      }
    })
  }

  pub fn subscribe<K, F>(&self, key: &K, callback: F) -> SubscriptionId
  where
    K: QueryKey + ?Sized,
    F: Fn(&CacheEvent) + Send + Sync + 'static,
  {
    let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
    self.shared.subscribers().insert(
      id,
      Subscriber {
        key: key.cache_hash(),
        callback: Arc::new(callback),
      },
    );
    id
  }

  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    self.shared.subscribers().remove(&id).is_some()
  }

  /// Forget every entry and subscriber.
  pub fn reset(&self) {
    self.shared.entries().clear();
    self.shared.subscribers().clear();
  }

  pub fn len(&self) -> usize {
    self.shared.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.shared.entries().is_empty()
  }

  /// Decide under one lock whether to serve, join or start a fetch.
  fn ensure<K, T, F, Fut>(
    &self,
    key: &K,
    fetcher: F,
    options: ReadOptions,
    force: bool,
  ) -> (CacheResult<T>, Option<SharedFetch>)
  where
    K: QueryKey + ?Sized,
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let hash = key.cache_hash();
    let now = Instant::now();
    let mut started = None;

    let (snapshot, in_flight) = {
      let mut entries = self.shared.entries();
      let entry = entries
        .entry(hash.clone())
        .or_insert_with(|| CacheEntry::new(key.description(), now, options.cache_time));

      if entry.in_flight.is_none() && entry.is_expired(now) {
        debug!(key = %entry.description, "Entry expired, loading afresh");
        *entry = CacheEntry::new(key.description(), now, options.cache_time);
      }
      if !entry.holds::<T>() {
        warn!(key = %entry.description, "Cached value has a different type, reloading");
        *entry = CacheEntry::new(key.description(), now, options.cache_time);
      }
      entry.last_access = now;
      entry.cache_time = options.cache_time;

      let needs_fetch = if entry.in_flight.is_some() {
        debug!(key = %entry.description, "Joining in-flight fetch");
        false
      } else if force {
        true
      } else if entry.status == CacheStatus::Error && !entry.invalidated {
        false
      } else if entry.data.is_none() {
        true
      } else {
        entry.is_stale(now)
      };

      if needs_fetch {
        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let pending = self.start_fetch(hash.clone(), generation, fetcher(), options);
        if entry.data.is_none() {
          entry.status = CacheStatus::Loading;
          debug!(key = %entry.description, "Cache miss, fetching");
        } else {
          debug!(key = %entry.description, "Serving stale data, revalidating");
        }
        entry.generation = generation;
        entry.in_flight = Some(pending.clone());
        started = Some(pending);
      } else if entry.in_flight.is_none() {
        debug!(key = %entry.description, "Cache hit");
      }

      (entry.snapshot::<T>(now), entry.in_flight.clone())
    };

    if let Some(pending) = started {
      match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
          handle.spawn(pending);
        }
        Err(_) => warn!(key = %hash, "No tokio runtime, fetch runs only when awaited"),
      }
      self.shared.notify(vec![
        CacheEventKind::FetchStarted.into_event(&hash, snapshot.status)
      ]);
    }

    (snapshot, in_flight)
  }

  fn start_fetch<T, Fut>(
    &self,
    hash: String,
    generation: u64,
    fut: Fut,
    options: ReadOptions,
  ) -> SharedFetch
  where
    T: Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let weak = Arc::downgrade(&self.shared);
    async move {
      let result = fut.await.map(|data| Arc::new(data) as AnyData);
      if let Some(shared) = weak.upgrade() {
        shared.settle(&hash, generation, &result, options);
      }
      result
    }
    .boxed()
    .shared()
  }
}

fn downcast<T: Send + Sync + 'static>(data: AnyData) -> Result<Arc<T>, ApiError> {
  data
    .downcast::<T>()
    .map_err(|_| ApiError::Decode("cached value has an unexpected type".to_string()))
}
