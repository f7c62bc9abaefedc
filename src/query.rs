//! Query handle binding a cache key to its fetcher.
//!
//! Inspired by TanStack Query, a `Query<T>` is what presentation code holds on
//! to: it reads through the shared [`ResponseCache`], exposes loading / error
//! state, and reports when the underlying entry changes.
//!
//! # Example
//!
//! ```ignore
//! let api = client.clone();
//! let mut query = Query::new(cache.clone(), "sectors", options, move || {
//!     let api = api.clone();
//!     async move { api.sector_averages().await }
//! });
//!
//! // In render
//! let result = query.read();
//! if result.is_loading() { render_spinner() }
//! else if let Some(error) = &result.error { render_alert(error) }
//! if let Some(data) = &result.data { render_table(data) }
//!
//! // In event loop tick
//! if query.poll() {
//!     // Entry changed, trigger re-render
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cache::{CacheEvent, CacheResult, QueryKey, ReadOptions, ResponseCache, SubscriptionId};
use crate::error::ApiError;

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Hash and description captured from the caller's key.
#[derive(Debug, Clone)]
struct BoundKey {
  hash: String,
  description: String,
}

impl QueryKey for BoundKey {
  fn cache_hash(&self) -> String {
    self.hash.clone()
  }

  fn description(&self) -> String {
    self.description.clone()
  }
}

/// Cached query for one key.
///
/// Subscribes to its cache entry on construction and unsubscribes on drop.
pub struct Query<T> {
  cache: ResponseCache,
  key: BoundKey,
  fetcher: FetcherFn<T>,
  options: ReadOptions,
  receiver: mpsc::UnboundedReceiver<CacheEvent>,
  subscription: SubscriptionId,
}

impl<T: Send + Sync + 'static> Query<T> {
  /// Create a query for `key`.
  ///
  /// The fetcher is called each time the cache decides a fetch is needed.
  pub fn new<K, F, Fut>(cache: ResponseCache, key: &K, options: ReadOptions, fetcher: F) -> Self
  where
    K: QueryKey + ?Sized,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let key = BoundKey {
      hash: key.cache_hash(),
      description: key.description(),
    };
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = cache.subscribe(&key, move |event: &CacheEvent| {
      // Ignore send errors - the query may be mid-drop
      let _ = tx.send(event.clone());
    });

    Self {
      cache,
      key,
      fetcher: Box::new(move || Box::pin(fetcher())),
      options,
      receiver: rx,
      subscription,
    }
  }

  /// Current data, status and error, starting a fetch when the cache says so.
  pub fn read(&self) -> CacheResult<T> {
    self.cache.read(&self.key, || (self.fetcher)(), self.options)
  }

  /// Fetch now, joining a fetch already in flight.
  pub fn refetch(&self) -> CacheResult<T> {
    self.cache.refetch(&self.key, || (self.fetcher)(), self.options)
  }

  /// Wait for data.
  pub async fn fetch(&self) -> Result<Arc<T>, ApiError> {
    self.cache.fetch(&self.key, || (self.fetcher)(), self.options).await
  }

  /// Current state without fetching.
  pub fn peek(&self) -> Option<CacheResult<T>> {
    self.cache.peek(&self.key)
  }

  pub fn invalidate(&self) -> bool {
    self.cache.invalidate(&self.key)
  }

  pub fn key(&self) -> &str {
    &self.key.hash
  }

  /// Drain pending change notifications.
  ///
  /// Returns `true` if the entry changed since the last call. Call this in
  /// your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    while self.receiver.try_recv().is_ok() {
      changed = true;
    }
    changed
  }

  /// Wait for the next change notification.
  pub async fn changed(&mut self) -> Option<CacheEvent> {
    self.receiver.recv().await
  }
}

impl<T> Drop for Query<T> {
  fn drop(&mut self) {
    self.cache.unsubscribe(self.subscription);
  }
}

// Query is not Clone because the fetcher is boxed and receiver is owned.

impl<T> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key.description)
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}
