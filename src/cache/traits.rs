//! Core traits and types for the caching system.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::ApiError;

/// A logical query key.
///
/// `cache_hash` identifies the entry; `description` is for logs.
pub trait QueryKey {
  fn cache_hash(&self) -> String;

  fn description(&self) -> String {
    self.cache_hash()
  }
}

impl QueryKey for str {
  fn cache_hash(&self) -> String {
    self.to_string()
  }
}

impl QueryKey for String {
  fn cache_hash(&self) -> String {
    self.clone()
  }
}

/// Freshness policy for one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
  /// How long fetched data is served without revalidation.
  pub stale_time: Duration,
  /// How long an entry lives before it is treated as absent.
  pub cache_time: Duration,
}

impl ReadOptions {
  pub fn new(stale_time: Duration, cache_time: Duration) -> Self {
    Self {
      stale_time,
      cache_time,
    }
  }
}

impl Default for ReadOptions {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(5 * 60),
      cache_time: Duration::from_secs(10 * 60),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
  Idle,
  Loading,
  Success,
  Error,
}

/// What happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
  FetchStarted,
  Updated,
  Failed,
  Invalidated,
}

/// Delivered to subscribers of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
  pub key: String,
  pub kind: CacheEventKind,
  pub status: CacheStatus,
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// Result of a cache read, including data and metadata about its freshness.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// Last successfully fetched data, kept through later failures
  pub data: Option<Arc<T>>,
  pub status: CacheStatus,
  /// Error from the most recent failed fetch
  pub error: Option<ApiError>,
  /// A fetch for this key is in flight
  pub is_fetching: bool,
  /// Data is past its stale time or was invalidated
  pub is_stale: bool,
  pub fetched_at: Option<Instant>,
}

impl<T> CacheResult<T> {
  /// Nothing to show yet and a fetch is running.
  pub fn is_loading(&self) -> bool {
    self.status == CacheStatus::Loading
  }

  pub fn is_error(&self) -> bool {
    self.status == CacheStatus::Error
  }

  pub fn is_success(&self) -> bool {
    self.status == CacheStatus::Success
  }
}
