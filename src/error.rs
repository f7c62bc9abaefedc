//! Normalized errors for everything that talks to the backend.
//!
//! Every failure the request layer can produce is folded into [`ApiError`] so
//! the cache and presentation code only ever deal with one shape.

use std::time::Duration;

/// Message used when no response reached the server.
pub const NETWORK_ERROR_MESSAGE: &str = "Network Error";

/// A normalized request failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
  /// No response reached the server (connection refused, DNS, reset).
  #[error("{0}")]
  Network(String),
  /// The per-attempt wall-clock timeout elapsed.
  #[error("timeout of {}ms exceeded", .0.as_millis())]
  Timeout(Duration),
  /// The server answered with a structured 4xx/5xx failure.
  #[error("{message}")]
  Server { status: u16, message: String },
  /// Input rejected before anything was dispatched.
  #[error("{0}")]
  Validation(String),
  /// A successful response whose body did not match the expected shape.
  #[error("Failed to decode response: {0}")]
  Decode(String),
  /// Superseded or explicitly aborted. Never surfaced to users.
  #[error("Request cancelled")]
  Cancelled,
}

/// Coarse classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Network,
  Timeout,
  Server,
  Validation,
  Decode,
  Cancelled,
}

impl ApiError {
  pub fn network(message: impl Into<String>) -> Self {
    Self::Network(message.into())
  }

  pub fn validation(message: impl Into<String>) -> Self {
    Self::Validation(message.into())
  }

  /// Build a server error from a status code and an optional `detail`.
  pub fn server(status: u16, detail: Option<String>) -> Self {
    let message = detail
      .filter(|d| !d.trim().is_empty())
      .unwrap_or_else(|| format!("Request failed with status code {}", status));
    Self::Server { status, message }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Network(_) => ErrorKind::Network,
      Self::Timeout(_) => ErrorKind::Timeout,
      Self::Server { .. } => ErrorKind::Server,
      Self::Validation(_) => ErrorKind::Validation,
      Self::Decode(_) => ErrorKind::Decode,
      Self::Cancelled => ErrorKind::Cancelled,
    }
  }

  /// Transient failures consume retry budget; everything else settles at once.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Network(_) | Self::Timeout(_))
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Cancelled)
  }

  pub fn is_user_visible(&self) -> bool {
    !self.is_cancelled()
  }

  /// HTTP status for server errors.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Server { status, .. } => Some(*status),
      _ => None,
    }
  }
}
