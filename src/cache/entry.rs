//! A single cache slot.

use futures::future::{BoxFuture, Shared};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::traits::{CacheResult, CacheStatus};
use crate::error::ApiError;

pub(super) type AnyData = Arc<dyn Any + Send + Sync>;
pub(super) type SharedFetch = Shared<BoxFuture<'static, Result<AnyData, ApiError>>>;

pub(super) struct CacheEntry {
  pub description: String,
  pub data: Option<AnyData>,
  pub status: CacheStatus,
  pub error: Option<ApiError>,
  pub fetched_at: Option<Instant>,
  pub stale_at: Option<Instant>,
  pub expires_at: Option<Instant>,
  pub last_access: Instant,
  pub cache_time: Duration,
  pub invalidated: bool,
  /// Generation current when the entry was last invalidated.
  pub invalidated_at: u64,
  pub in_flight: Option<SharedFetch>,
  /// Generation of the fetch allowed to settle this entry.
  pub generation: u64,
}

impl CacheEntry {
  pub fn new(description: String, now: Instant, cache_time: Duration) -> Self {
    Self {
      description,
      data: None,
      status: CacheStatus::Idle,
      error: None,
      fetched_at: None,
      stale_at: None,
      expires_at: None,
      last_access: now,
      cache_time,
      invalidated: false,
      invalidated_at: 0,
      in_flight: None,
      generation: 0,
    }
  }

  /// Mark stale. A fetch already in flight does not clear the mark.
  pub fn invalidate(&mut self) {
    self.invalidated = true;
    self.invalidated_at = self.generation;
  }

  pub fn is_expired(&self, now: Instant) -> bool {
    self.expires_at.is_some_and(|at| now >= at)
  }

  pub fn is_stale(&self, now: Instant) -> bool {
    self.invalidated || self.stale_at.map_or(true, |at| now >= at)
  }

  /// No access for longer than `cache_time` and nothing pending.
  pub fn is_evictable(&self, now: Instant) -> bool {
    self.in_flight.is_none() && now.saturating_duration_since(self.last_access) > self.cache_time
  }

  pub fn holds<T: Any>(&self) -> bool {
    self.data.as_ref().map_or(true, |d| (**d).is::<T>())
  }

  pub fn snapshot<T: Send + Sync + 'static>(&self, now: Instant) -> CacheResult<T> {
    CacheResult {
      data: self
        .data
        .clone()
        .and_then(|d| d.downcast::<T>().ok()),
      status: self.status,
      error: self.error.clone(),
      is_fetching: self.in_flight.is_some(),
      is_stale: self.data.is_some() && self.is_stale(now),
      fetched_at: self.fetched_at,
    }
  }
}
