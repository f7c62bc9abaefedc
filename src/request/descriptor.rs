//! Description of a single network operation.

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::error::ApiError;

pub const DEFAULT_RETRY: u32 = 2;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which requests a new request supersedes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SupersedeScope {
  /// Any pending request with the same method and path.
  #[default]
  Endpoint,
  /// Only a pending request with the same method, path, parameters and body.
  Signature,
}

/// Registry key for in-flight requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: Method,
  pub path: String,
  signature: Option<String>,
}

impl RequestKey {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      signature: None,
    }
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.path)?;
    if let Some(sig) = &self.signature {
      write!(f, " [{}]", sig)?;
    }
    Ok(())
  }
}

/// One network operation with its retry and timeout policy.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
  pub method: Method,
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
  /// Additional attempts allowed after the first transient failure.
  pub retry: u32,
  /// Constant delay between attempts.
  pub retry_delay: Duration,
  /// Wall-clock limit for each attempt.
  pub timeout: Duration,
  pub scope: SupersedeScope,
}

impl RequestDescriptor {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: None,
      retry: DEFAULT_RETRY,
      retry_delay: DEFAULT_RETRY_DELAY,
      timeout: DEFAULT_TIMEOUT,
      scope: SupersedeScope::default(),
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::GET, path)
  }

  pub fn post(path: impl Into<String>) -> Self {
    Self::new(Method::POST, path)
  }

  pub fn query(mut self, name: &str, value: impl ToString) -> Self {
    self.query.push((name.to_string(), value.to_string()));
    self
  }

  /// Attach a JSON body. Serialization failures surface as validation errors.
  pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
    let value = serde_json::to_value(body)
      .map_err(|e| ApiError::validation(format!("Failed to encode request body: {}", e)))?;
    self.body = Some(value);
    Ok(self)
  }

  pub fn retry(mut self, retry: u32) -> Self {
    self.retry = retry;
    self
  }

  pub fn retry_delay(mut self, delay: Duration) -> Self {
    self.retry_delay = delay;
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn supersede(mut self, scope: SupersedeScope) -> Self {
    self.scope = scope;
    self
  }

  /// Reject malformed descriptors before anything is registered.
  pub fn validate(&self) -> Result<(), ApiError> {
    if self.path.is_empty() {
      return Err(ApiError::validation("Request path must not be empty"));
    }
    if !self.path.starts_with('/') {
      return Err(ApiError::validation(format!(
        "Request path must start with '/': {}",
        self.path
      )));
    }
    if self.timeout.is_zero() {
      return Err(ApiError::validation("Request timeout must be greater than zero"));
    }
    Ok(())
  }

  /// Key used by the supersede policy.
  pub fn key(&self) -> RequestKey {
    let mut key = RequestKey::new(self.method.clone(), self.path.clone());
    if self.scope == SupersedeScope::Signature {
      let mut params = self.query.clone();
      params.sort();
      let mut sig = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
      if let Some(body) = &self.body {
        sig.push('#');
        sig.push_str(&body.to_string());
      }
      key.signature = Some(sig);
    }
    key
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_endpoint_scope_ignores_params() {
    let a = RequestDescriptor::get("/analytics/companies/search").query("q", "app");
    let b = RequestDescriptor::get("/analytics/companies/search").query("q", "micro");
    assert_eq!(a.key(), b.key());
    assert_eq!(a.key().to_string(), "GET /analytics/companies/search");
  }

  #[test]
  fn test_signature_scope_distinguishes_params() {
    let a = RequestDescriptor::get("/analytics/companies/search")
      .query("q", "app")
      .supersede(SupersedeScope::Signature);
    let b = RequestDescriptor::get("/analytics/companies/search")
      .query("q", "micro")
      .supersede(SupersedeScope::Signature);
    assert_ne!(a.key(), b.key());
  }

  #[test]
  fn test_signature_is_order_independent() {
    let a = RequestDescriptor::get("/x")
      .query("a", 1)
      .query("b", 2)
      .supersede(SupersedeScope::Signature);
    let b = RequestDescriptor::get("/x")
      .query("b", 2)
      .query("a", 1)
      .supersede(SupersedeScope::Signature);
    assert_eq!(a.key(), b.key());
  }

  #[test]
  fn test_validate() {
    assert!(RequestDescriptor::get("/health").validate().is_ok());
    assert!(matches!(
      RequestDescriptor::get("").validate(),
      Err(ApiError::Validation(_))
    ));
    assert!(matches!(
      RequestDescriptor::get("health").validate(),
      Err(ApiError::Validation(_))
    ));
    assert!(matches!(
      RequestDescriptor::get("/health")
        .timeout(Duration::ZERO)
        .validate(),
      Err(ApiError::Validation(_))
    ));
  }
}
