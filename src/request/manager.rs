//! Executes requests with supersede, retry and cancellation.

use chrono::Utc;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::descriptor::{RequestDescriptor, RequestKey};
use super::registry::{InFlightGuard, InFlightRegistry};
use super::state::RequestState;
use super::transport::{OutgoingRequest, Transport};
use crate::error::ApiError;

/// Settled states kept for keys with nothing in flight.
const MAX_SETTLED_STATES: usize = 256;

/// Last observed state per key, tagged with the registration id that wrote it.
#[derive(Debug, Default)]
struct StateBook {
  states: Mutex<HashMap<RequestKey, (u64, RequestState)>>,
}

impl StateBook {
  fn states(&self) -> MutexGuard<'_, HashMap<RequestKey, (u64, RequestState)>> {
    self.states.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Older requests never overwrite what a newer one recorded.
  fn record(&self, key: &RequestKey, id: u64, state: RequestState) {
    let mut states = self.states();
    match states.get(key) {
      Some((current, _)) if *current > id => {}
      _ => {
        states.insert(key.clone(), (id, state));
      }
    }
    if states.len() > MAX_SETTLED_STATES {
      let before = states.len();
      states.retain(|k, (_, s)| !s.is_terminal() || k == key);
      debug!(pruned = before - states.len(), "Pruned settled request states");
    }
  }

  #[cfg(test)]
  fn len(&self) -> usize {
    self.states().len()
  }

  fn get(&self, key: &RequestKey) -> Option<RequestState> {
    self.states().get(key).map(|(_, state)| *state)
  }
}

/// Walks one request through its [`RequestState`] edges.
struct Lifecycle<'a> {
  book: &'a StateBook,
  guard: &'a InFlightGuard,
  state: RequestState,
}

impl<'a> Lifecycle<'a> {
  fn new(book: &'a StateBook, guard: &'a InFlightGuard) -> Self {
    Self {
      book,
      guard,
      state: RequestState::Idle,
    }
  }

  fn advance(&mut self, next: RequestState) {
    match self.state.transition(next) {
      Ok(state) => {
        self.state = state;
        self.book.record(self.guard.key(), self.guard.id(), state);
      }
      Err(e) => warn!(key = %self.guard.key(), error = %e, "Ignoring request transition"),
    }
  }
}

/// Issues requests through a [`Transport`].
///
/// Cloning is cheap; clones share the in-flight registry and state book.
#[derive(Clone)]
pub struct RequestManager {
  transport: Arc<dyn Transport>,
  registry: Arc<InFlightRegistry>,
  book: Arc<StateBook>,
}

impl RequestManager {
  pub fn new(transport: impl Transport + 'static) -> Self {
    Self::with_registry(Arc::new(transport), Arc::new(InFlightRegistry::new()))
  }

  pub fn with_registry(transport: Arc<dyn Transport>, registry: Arc<InFlightRegistry>) -> Self {
    Self {
      transport,
      registry,
      book: Arc::new(StateBook::default()),
    }
  }

  pub fn registry(&self) -> &Arc<InFlightRegistry> {
    &self.registry
  }

  /// Execute `descriptor` and decode the JSON response into `T`.
  ///
  /// The request is validated and registered when this is called, not when the
  /// returned future is first polled, so a later call for the same key always
  /// supersedes an earlier one. A superseded or cancelled request resolves to
  /// [`ApiError::Cancelled`].
  pub fn execute<T>(
    &self,
    descriptor: RequestDescriptor,
  ) -> impl Future<Output = Result<T, ApiError>> + Send + 'static
  where
    T: DeserializeOwned + Send + 'static,
  {
    let correlation_id = Uuid::new_v4();
    let span = info_span!(
      "request",
      correlation_id = %correlation_id,
      method = %descriptor.method,
      path = %descriptor.path,
    );

    let ticket = descriptor
      .validate()
      .map(|()| self.registry.register(descriptor.key(), correlation_id));
    let transport = Arc::clone(&self.transport);
    let book = Arc::clone(&self.book);

    async move {
      let guard = ticket?;
      let mut lifecycle = Lifecycle::new(&book, &guard);
      attempt_loop(
        transport.as_ref(),
        &descriptor,
        &guard,
        correlation_id,
        &mut lifecycle,
      )
      .await
    }
    .instrument(span)
  }

  /// Cancel the pending request for `key`.
  pub fn cancel(&self, key: &RequestKey) -> bool {
    self.registry.cancel(key)
  }

  /// Cancel every pending request, e.g. when the consuming view goes away.
  pub fn cancel_all(&self) -> usize {
    self.registry.cancel_all()
  }

  /// Last observed state of the newest request issued for `key`.
  pub fn state_of(&self, key: &RequestKey) -> Option<RequestState> {
    self.book.get(key)
  }

  pub fn in_flight_count(&self) -> usize {
    self.registry.len()
  }

  /// Cancel everything and forget recorded states.
  pub fn reset(&self) {
    self.registry.cancel_all();
    self.book.states().clear();
  }
}

async fn attempt_loop<T: DeserializeOwned>(
  transport: &dyn Transport,
  descriptor: &RequestDescriptor,
  guard: &InFlightGuard,
  correlation_id: Uuid,
  lifecycle: &mut Lifecycle<'_>,
) -> Result<T, ApiError> {
  let token = guard.token().clone();
  let mut remaining = descriptor.retry;
  let mut attempt = 1;

  loop {
    lifecycle.advance(RequestState::Pending { attempt });

    let request = OutgoingRequest {
      method: descriptor.method.clone(),
      path: descriptor.path.clone(),
      query: descriptor.query.clone(),
      body: descriptor.body.clone(),
      correlation_id,
      timestamp: Utc::now(),
      attempt,
    };

    let outcome = tokio::select! {
      biased;
      _ = token.cancelled() => Err(ApiError::Cancelled),
      result = tokio::time::timeout(descriptor.timeout, transport.send(&request)) => {
        result.unwrap_or(Err(ApiError::Timeout(descriptor.timeout)))
      }
    };

    match outcome {
      Ok(value) => {
        return match serde_json::from_value(value) {
          Ok(data) => {
            lifecycle.advance(RequestState::Success);
            debug!(attempt, "Request succeeded");
            Ok(data)
          }
          Err(e) => {
            lifecycle.advance(RequestState::Failed { retryable: false });
            info!(attempt, error = %e, "Response did not match the expected shape");
            Err(ApiError::Decode(e.to_string()))
          }
        };
      }
      Err(ApiError::Cancelled) => {
        lifecycle.advance(RequestState::Cancelled);
        debug!(attempt, "Request cancelled");
        return Err(ApiError::Cancelled);
      }
      Err(err) if err.is_retryable() && remaining > 0 => {
        remaining -= 1;
        lifecycle.advance(RequestState::Failed { retryable: true });
        warn!(attempt, remaining, error = %err, "Transient failure, retrying");

        tokio::select! {
          biased;
          _ = token.cancelled() => {
            lifecycle.advance(RequestState::Cancelled);
            debug!(attempt, "Request cancelled while waiting to retry");
            return Err(ApiError::Cancelled);
          }
          _ = tokio::time::sleep(descriptor.retry_delay) => {}
        }
        attempt += 1;
      }
      Err(err) => {
        lifecycle.advance(RequestState::Failed { retryable: false });
        info!(attempt, error = %err, "Request failed");
        return Err(err);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use serde_json::{json, Value};
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;
  use tokio::time::Instant;

  type Respond = dyn Fn(u32, &OutgoingRequest) -> Result<Value, ApiError> + Send + Sync;

  /// Answers after `latency` with whatever `respond` returns for the call number.
  struct FakeTransport {
    calls: AtomicU32,
    latency: Duration,
    respond: Box<Respond>,
    seen: Mutex<Vec<OutgoingRequest>>,
  }

  impl FakeTransport {
    fn new<F>(latency: Duration, respond: F) -> Arc<Self>
    where
      F: Fn(u32, &OutgoingRequest) -> Result<Value, ApiError> + Send + Sync + 'static,
    {
      Arc::new(Self {
        calls: AtomicU32::new(0),
        latency,
        respond: Box::new(respond),
        seen: Mutex::new(Vec::new()),
      })
    }

    fn calls(&self) -> u32 {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl Transport for FakeTransport {
    async fn send(&self, request: &OutgoingRequest) -> Result<Value, ApiError> {
      let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
      self.seen.lock().unwrap().push(request.clone());
      tokio::time::sleep(self.latency).await;
      (self.respond)(call, request)
    }
  }

  fn manager(transport: &Arc<FakeTransport>) -> RequestManager {
    let transport: Arc<dyn Transport> = transport.clone();
    RequestManager::with_registry(transport, Arc::new(InFlightRegistry::new()))
  }

  fn sectors() -> RequestDescriptor {
    RequestDescriptor::get("/api/analytics/sectors/average")
      .retry_delay(Duration::from_millis(100))
      .timeout(Duration::from_secs(5))
  }

  #[tokio::test(start_paused = true)]
  async fn test_success_decodes_body() {
    let transport = FakeTransport::new(Duration::from_millis(20), |_, _| {
      Ok(json!([{"sector": "Technology", "avg_esg_score": 18.5, "company_count": 70}]))
    });
    let manager = manager(&transport);

    let rows: Vec<Value> = manager.execute(sectors()).await.unwrap();

    assert_eq!(rows[0]["sector"], "Technology");
    assert_eq!(transport.calls(), 1);
    assert_eq!(manager.state_of(&sectors().key()), Some(RequestState::Success));
    assert_eq!(manager.in_flight_count(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_exhaustion_makes_budget_plus_one_attempts() {
    let transport = FakeTransport::new(Duration::from_millis(5), |_, _| {
      Err(ApiError::network("Network Error"))
    });
    let manager = manager(&transport);

    let result: Result<Value, _> = manager.execute(sectors().retry(2)).await;

    assert_eq!(result.unwrap_err(), ApiError::network("Network Error"));
    assert_eq!(transport.calls(), 3);
    assert_eq!(
      manager.state_of(&sectors().key()),
      Some(RequestState::Failed { retryable: false })
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_delay_is_constant() {
    let transport = FakeTransport::new(Duration::ZERO, |_, _| Err(ApiError::network("down")));
    let manager = manager(&transport);
    let start = Instant::now();

    let descriptor = sectors().retry(3).retry_delay(Duration::from_millis(250));
    let _ = manager.execute::<Value>(descriptor).await;

    assert_eq!(transport.calls(), 4);
    assert_eq!(start.elapsed(), Duration::from_millis(750));
  }

  #[tokio::test(start_paused = true)]
  async fn test_recovers_after_transient_failure() {
    let transport = FakeTransport::new(Duration::from_millis(5), |call, _| {
      if call == 1 {
        Err(ApiError::network("Network Error"))
      } else {
        Ok(json!({"status": "healthy"}))
      }
    });
    let manager = manager(&transport);

    let health: Value = manager
      .execute(RequestDescriptor::get("/health").retry(1))
      .await
      .unwrap();

    assert_eq!(health["status"], "healthy");
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_server_error_is_not_retried() {
    let transport = FakeTransport::new(Duration::from_millis(5), |_, _| {
      Err(ApiError::server(500, Some("Failed to fetch sector averages".into())))
    });
    let manager = manager(&transport);

    let err = manager
      .execute::<Value>(sectors().retry(5))
      .await
      .unwrap_err();

    assert_eq!(err.to_string(), "Failed to fetch sector averages");
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeout_is_retried_then_surfaced() {
    let transport = FakeTransport::new(Duration::from_secs(60), |_, _| Ok(json!(null)));
    let manager = manager(&transport);

    let descriptor = sectors().timeout(Duration::from_secs(1)).retry(1);
    let err = manager.execute::<Value>(descriptor).await.unwrap_err();

    assert_eq!(err, ApiError::Timeout(Duration::from_secs(1)));
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_validation_error_is_never_dispatched() {
    let transport = FakeTransport::new(Duration::ZERO, |_, _| Ok(json!(null)));
    let manager = manager(&transport);

    let err = manager
      .execute::<Value>(RequestDescriptor::get("no-slash"))
      .await
      .unwrap_err();

    assert!(matches!(err, ApiError::Validation(_)));
    assert_eq!(transport.calls(), 0);
    assert_eq!(manager.in_flight_count(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_decode_failure() {
    let transport = FakeTransport::new(Duration::ZERO, |_, _| Ok(json!({"unexpected": true})));
    let manager = manager(&transport);

    let err = manager.execute::<Vec<String>>(sectors()).await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
    assert_eq!(transport.calls(), 1);
    assert_eq!(
      manager.state_of(&sectors().key()),
      Some(RequestState::Failed { retryable: false })
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_back_to_back_calls_only_second_succeeds() {
    let transport = FakeTransport::new(Duration::from_millis(50), |call, _| Ok(json!(call)));
    let manager = manager(&transport);

    let first = manager.execute::<u32>(sectors());
    let second = manager.execute::<u32>(sectors());
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first, Err(ApiError::Cancelled));
    assert!(second.is_ok());
    // The first was superseded before it ever reached the transport.
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_newer_request_cancels_one_already_on_the_wire() {
    let transport = FakeTransport::new(Duration::from_millis(100), |call, _| Ok(json!(call)));
    let manager = manager(&transport);

    let first = tokio::spawn(manager.execute::<u32>(sectors()));
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = manager.execute::<u32>(sectors()).await;

    assert_eq!(first.await.unwrap(), Err(ApiError::Cancelled));
    assert_eq!(second, Ok(2));
    assert_eq!(transport.calls(), 2);
    assert_eq!(manager.state_of(&sectors().key()), Some(RequestState::Success));
  }

  #[tokio::test(start_paused = true)]
  async fn test_different_keys_run_concurrently() {
    let transport = FakeTransport::new(Duration::from_millis(100), |_, req| Ok(json!(req.path)));
    let manager = manager(&transport);
    let start = Instant::now();

    let (a, b) = tokio::join!(
      manager.execute::<String>(RequestDescriptor::get("/a")),
      manager.execute::<String>(RequestDescriptor::get("/b")),
    );

    assert_eq!(a.unwrap(), "/a");
    assert_eq!(b.unwrap(), "/b");
    assert_eq!(start.elapsed(), Duration::from_millis(100));
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancel_key_mid_flight() {
    let transport = FakeTransport::new(Duration::from_secs(1), |_, _| Ok(json!(1)));
    let manager = manager(&transport);

    let pending = tokio::spawn(manager.execute::<u32>(sectors()));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(manager.cancel(&sectors().key()));

    assert_eq!(pending.await.unwrap(), Err(ApiError::Cancelled));
    assert_eq!(manager.state_of(&sectors().key()), Some(RequestState::Cancelled));
    assert_eq!(manager.in_flight_count(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancel_during_retry_delay() {
    let transport = FakeTransport::new(Duration::ZERO, |_, _| Err(ApiError::network("down")));
    let manager = manager(&transport);

    let descriptor = sectors().retry(5).retry_delay(Duration::from_secs(10));
    let pending = tokio::spawn(manager.execute::<Value>(descriptor));
    tokio::time::sleep(Duration::from_secs(1)).await;
    manager.cancel_all();

    assert_eq!(pending.await.unwrap(), Err(ApiError::Cancelled));
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancel_all() {
    let transport = FakeTransport::new(Duration::from_secs(1), |_, _| Ok(json!(1)));
    let manager = manager(&transport);

    let a = tokio::spawn(manager.execute::<u32>(RequestDescriptor::get("/a")));
    let b = tokio::spawn(manager.execute::<u32>(RequestDescriptor::get("/b")));
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(manager.cancel_all(), 2);
    assert_eq!(a.await.unwrap(), Err(ApiError::Cancelled));
    assert_eq!(b.await.unwrap(), Err(ApiError::Cancelled));
  }

  #[tokio::test(start_paused = true)]
  async fn test_correlation_id_is_stable_across_attempts() {
    let transport = FakeTransport::new(Duration::ZERO, |_, _| Err(ApiError::network("down")));
    let manager = manager(&transport);

    let _ = manager.execute::<Value>(sectors().retry(2)).await;

    let seen = transport.seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|r| r.correlation_id == seen[0].correlation_id));
    let attempts: Vec<u32> = seen.iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropped_future_releases_registry() {
    let transport = FakeTransport::new(Duration::ZERO, |_, _| Ok(json!(1)));
    let manager = manager(&transport);

    let pending = manager.execute::<u32>(sectors());
    assert_eq!(manager.in_flight_count(), 1);
    drop(pending);
    assert_eq!(manager.in_flight_count(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_settled_states_are_pruned() {
    let transport = FakeTransport::new(Duration::ZERO, |_, _| Ok(json!({})));
    let manager = manager(&transport);

    for i in 0..(MAX_SETTLED_STATES + 50) {
      let descriptor = RequestDescriptor::get(format!("/api/analytics/companies/S{}", i));
      manager.execute::<Value>(descriptor).await.unwrap();
    }

    assert!(manager.book.len() <= MAX_SETTLED_STATES);
    let last = RequestDescriptor::get(format!(
      "/api/analytics/companies/S{}",
      MAX_SETTLED_STATES + 49
    ));
    assert_eq!(manager.state_of(&last.key()), Some(RequestState::Success));
  }

  #[test]
  fn test_pruning_keeps_live_states() {
    let book = StateBook::default();
    let live = RequestKey::new(reqwest::Method::GET, "/live");
    book.record(&live, 0, RequestState::Pending { attempt: 1 });
    for i in 0..(MAX_SETTLED_STATES + 1) {
      let key = RequestKey::new(reqwest::Method::GET, format!("/done/{}", i));
      book.record(&key, i as u64 + 1, RequestState::Success);
    }
    assert_eq!(book.get(&live), Some(RequestState::Pending { attempt: 1 }));
  }
}
