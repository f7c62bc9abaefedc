//! In-memory response cache with staleness semantics.
//!
//! This module provides the caching mechanism behind every read endpoint:
//! - Serves fresh data without touching the network
//! - Serves stale data immediately while one background refetch runs
//! - Coalesces concurrent fetches for the same key
//! - Keeps the last good data through failed refetches
//! - Notifies subscribers when an entry changes

mod entry;
mod layer;
mod traits;

pub use layer::ResponseCache;
pub use traits::{
  CacheEvent, CacheEventKind, CacheResult, CacheStatus, QueryKey, ReadOptions, SubscriptionId,
};
