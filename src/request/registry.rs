//! Registry of pending requests, at most one per key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::descriptor::RequestKey;

#[derive(Debug)]
struct InFlight {
  id: u64,
  correlation_id: Uuid,
  started_at: Instant,
  token: CancellationToken,
}

/// Pending requests keyed by [`RequestKey`].
#[derive(Debug, Default)]
pub struct InFlightRegistry {
  entries: Mutex<HashMap<RequestKey, InFlight>>,
  next_id: AtomicU64,
}

impl InFlightRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<RequestKey, InFlight>> {
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Register a new request under `key`, cancelling whatever was pending there.
  ///
  /// The check for an existing entry and the insert happen under one lock so two
  /// callers can never both believe they own the key.
  pub fn register(self: &Arc<Self>, key: RequestKey, correlation_id: Uuid) -> InFlightGuard {
    let token = CancellationToken::new();

    let (id, previous) = {
      let mut entries = self.entries();
      let id = self.next_id.fetch_add(1, Ordering::Relaxed);
      let previous = entries.insert(
        key.clone(),
        InFlight {
          id,
          correlation_id,
          started_at: Instant::now(),
          token: token.clone(),
        },
      );
      (id, previous)
    };

    if let Some(previous) = previous {
      warn!(
        key = %key,
        superseded = %previous.correlation_id,
        by = %correlation_id,
        "Superseding pending request"
      );
      previous.token.cancel();
    }

    InFlightGuard {
      registry: Arc::clone(self),
      key,
      id,
      token,
    }
  }

  /// Cancel the pending request for `key`. Returns whether one existed.
  pub fn cancel(&self, key: &RequestKey) -> bool {
    match self.entries().remove(key) {
      Some(entry) => {
        debug!(key = %key, correlation_id = %entry.correlation_id, "Cancelling request");
        entry.token.cancel();
        true
      }
      None => false,
    }
  }

  /// Cancel every pending request. Returns how many were cancelled.
  pub fn cancel_all(&self) -> usize {
    let drained: Vec<_> = self.entries().drain().collect();
    for (key, entry) in &drained {
      debug!(key = %key, correlation_id = %entry.correlation_id, "Cancelling request");
      entry.token.cancel();
    }
    drained.len()
  }

  pub fn contains(&self, key: &RequestKey) -> bool {
    self.entries().contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries().is_empty()
  }

  /// When the pending request for `key` was registered.
  pub fn started_at(&self, key: &RequestKey) -> Option<Instant> {
    self.entries().get(key).map(|e| e.started_at)
  }

  /// Remove the entry for `key` only if it still belongs to request `id`.
  fn release(&self, key: &RequestKey, id: u64) {
    let mut entries = self.entries();
    if entries.get(key).is_some_and(|e| e.id == id) {
      entries.remove(key);
    }
  }
}

/// Ownership of one registry slot. Releases the slot on drop.
#[derive(Debug)]
pub struct InFlightGuard {
  registry: Arc<InFlightRegistry>,
  key: RequestKey,
  id: u64,
  token: CancellationToken,
}

impl InFlightGuard {
  /// Registration order; later registrations have larger ids.
  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn key(&self) -> &RequestKey {
    &self.key
  }

  pub fn token(&self) -> &CancellationToken {
    &self.token
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }
}

impl Drop for InFlightGuard {
  fn drop(&mut self) {
    self.registry.release(&self.key, self.id);
  }
}
