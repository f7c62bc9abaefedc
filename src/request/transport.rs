//! Network seam for the request manager.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::error::{ApiError, NETWORK_ERROR_MESSAGE};

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";
pub const REQUEST_TIMESTAMP_HEADER: &str = "X-Request-Timestamp";

/// A fully built attempt, ready to hit the wire.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
  pub method: Method,
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
  pub correlation_id: Uuid,
  pub timestamp: DateTime<Utc>,
  pub attempt: u32,
}

/// Sends one attempt and classifies its failure.
///
/// Implementations must map "no response" to [`ApiError::Network`] and
/// structured failure responses to [`ApiError::Server`].
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &OutgoingRequest) -> Result<Value, ApiError>;
}

/// Transport backed by `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
  timeout: Option<Duration>,
}

impl HttpTransport {
  pub fn new(base_url: Url) -> Result<Self> {
    Self::build(base_url, None)
  }

  /// Also set a client-level timeout, normally as a backstop to the
  /// per-attempt timeout the manager enforces.
  pub fn with_timeout(base_url: Url, timeout: Duration) -> Result<Self> {
    Self::build(base_url, Some(timeout))
  }

  fn build(base_url: Url, timeout: Option<Duration>) -> Result<Self> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      timeout,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn url_for(&self, path: &str) -> Result<Url, ApiError> {
    let joined = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
    Url::parse(&joined).map_err(|e| ApiError::validation(format!("Invalid URL {}: {}", joined, e)))
  }

  fn classify(&self, err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
      ApiError::Timeout(self.timeout.unwrap_or_default())
    } else if err.is_decode() {
      ApiError::Decode(err.to_string())
    } else {
      ApiError::network(NETWORK_ERROR_MESSAGE)
    }
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: &OutgoingRequest) -> Result<Value, ApiError> {
    let url = self.url_for(&request.path)?;

    let mut builder = self
      .client
      .request(request.method.clone(), url)
      .header(ACCEPT, "application/json")
      .header(REQUEST_ID_HEADER, request.correlation_id.to_string())
      .header(REQUEST_TIMESTAMP_HEADER, request.timestamp.to_rfc3339());

    if !request.query.is_empty() {
      builder = builder.query(&request.query);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder.send().await.map_err(|e| self.classify(e))?;
    let status = response.status();

    if !status.is_success() {
      // A body we cannot read still counts as a server answer.
      let body = response.text().await.unwrap_or_default();
      return Err(ApiError::server(status.as_u16(), extract_detail(&body)));
    }

    let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
    if bytes.is_empty() {
      return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
  }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
  detail: Option<Value>,
}

/// Pull the `detail` message out of a failure body.
///
/// FastAPI validation failures carry a list of `{loc, msg}` objects instead of
/// a string; their messages are joined.
pub fn extract_detail(body: &str) -> Option<String> {
  let parsed: ErrorBody = serde_json::from_str(body).ok()?;
  match parsed.detail? {
    Value::String(s) => Some(s),
    Value::Array(items) => {
      let messages: Vec<String> = items
        .iter()
        .map(|item| match item.get("msg").and_then(Value::as_str) {
          Some(msg) => msg.to_string(),
          None => item.to_string(),
        })
        .collect();
      (!messages.is_empty()).then(|| messages.join("; "))
    }
    Value::Null => None,
    other => Some(other.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use mockito::Matcher;

  fn outgoing(method: Method, path: &str) -> OutgoingRequest {
    OutgoingRequest {
      method,
      path: path.to_string(),
      query: Vec::new(),
      body: None,
      correlation_id: Uuid::new_v4(),
      timestamp: Utc::now(),
      attempt: 1,
    }
  }

  #[test]
  fn test_extract_detail_string() {
    assert_eq!(
      extract_detail(r#"{"detail": "Prediction failed"}"#),
      Some("Prediction failed".to_string())
    );
  }

  #[test]
  fn test_extract_detail_validation_list() {
    let body = r#"{"detail": [
      {"loc": ["query", "limit"], "msg": "ensure this value is less than or equal to 100"},
      {"loc": ["query", "q"], "msg": "field required"}
    ]}"#;
    assert_eq!(
      extract_detail(body),
      Some("ensure this value is less than or equal to 100; field required".to_string())
    );
  }

  #[test]
  fn test_extract_detail_missing() {
    assert_eq!(extract_detail(""), None);
    assert_eq!(extract_detail("<html>Bad Gateway</html>"), None);
    assert_eq!(extract_detail(r#"{"error": "x"}"#), None);
  }

  #[tokio::test]
  async fn test_send_attaches_correlation_headers() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/api/analytics/companies/top")
      .match_query(Matcher::UrlEncoded("limit".into(), "5".into()))
      .match_header(REQUEST_ID_HEADER, Matcher::Regex("^[0-9a-f-]{36}$".into()))
      .match_header(REQUEST_TIMESTAMP_HEADER, Matcher::Any)
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"[{"symbol": "MSFT"}]"#)
      .create_async()
      .await;

    let transport = HttpTransport::new(Url::parse(&server.url()).unwrap()).unwrap();
    let mut request = outgoing(Method::GET, "/api/analytics/companies/top");
    request.query.push(("limit".into(), "5".into()));

    let value = transport.send(&request).await.unwrap();
    assert_eq!(value[0]["symbol"], "MSFT");
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_send_posts_json_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/api/predict/")
      .match_body(Matcher::PartialJsonString(r#"{"controversy_score": 12.5}"#.into()))
      .with_status(200)
      .with_body(r#"{"risk_level": "Low"}"#)
      .create_async()
      .await;

    let transport = HttpTransport::new(Url::parse(&server.url()).unwrap()).unwrap();
    let mut request = outgoing(Method::POST, "/api/predict/");
    request.body = Some(serde_json::json!({"controversy_score": 12.5}));

    let value = transport.send(&request).await.unwrap();
    assert_eq!(value["risk_level"], "Low");
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_server_error_uses_detail() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/api/analytics/companies/NOPE")
      .with_status(404)
      .with_body(r#"{"detail": "Company with symbol 'NOPE' not found"}"#)
      .create_async()
      .await;

    let transport = HttpTransport::new(Url::parse(&server.url()).unwrap()).unwrap();
    let err = transport
      .send(&outgoing(Method::GET, "/api/analytics/companies/NOPE"))
      .await
      .unwrap_err();

    assert_eq!(
      err,
      ApiError::Server {
        status: 404,
        message: "Company with symbol 'NOPE' not found".into()
      }
    );
  }

  #[tokio::test]
  async fn test_server_error_without_body_falls_back() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/health")
      .with_status(503)
      .create_async()
      .await;

    let transport = HttpTransport::new(Url::parse(&server.url()).unwrap()).unwrap();
    let err = transport
      .send(&outgoing(Method::GET, "/health"))
      .await
      .unwrap_err();

    assert_eq!(err.to_string(), "Request failed with status code 503");
    assert!(!err.is_retryable());
  }

  #[tokio::test]
  async fn test_malformed_success_body_is_decode_error() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/health")
      .with_status(200)
      .with_body("not json")
      .create_async()
      .await;

    let transport = HttpTransport::new(Url::parse(&server.url()).unwrap()).unwrap();
    let err = transport
      .send(&outgoing(Method::GET, "/health"))
      .await
      .unwrap_err();

    assert!(matches!(err, ApiError::Decode(_)));
  }

  #[tokio::test]
  async fn test_unreachable_server_is_network_error() {
    // Port 1 is reserved and nothing listens there.
    let transport = HttpTransport::new(Url::parse("http://127.0.0.1:1").unwrap()).unwrap();
    let err = transport
      .send(&outgoing(Method::GET, "/health"))
      .await
      .unwrap_err();

    assert_eq!(err, ApiError::network(NETWORK_ERROR_MESSAGE));
    assert!(err.is_retryable());
  }
}
