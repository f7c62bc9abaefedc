//! Lifecycle of a single request.

use std::fmt;

/// State of one request.
///
/// ```text
/// Idle -> Pending -> Success
///                 -> Failed(retryable) -> Pending
///                 -> Failed(final)
/// any non-terminal state -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
  Idle,
  /// Waiting on the given attempt (1-based).
  Pending { attempt: u32 },
  Success,
  Failed { retryable: bool },
  Cancelled,
}

/// Returned when a lifecycle is driven along an edge it does not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid request transition {from} -> {to}")]
pub struct InvalidTransition {
  pub from: RequestState,
  pub to: RequestState,
}

impl RequestState {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      Self::Success | Self::Failed { retryable: false } | Self::Cancelled
    )
  }

  /// Move to `next` if the edge exists.
  pub fn transition(self, next: RequestState) -> Result<RequestState, InvalidTransition> {
    use RequestState::*;

    let allowed = match (self, next) {
      (Idle, Pending { attempt: 1 }) => true,
      (Pending { .. }, Success | Failed { .. }) => true,
      (Failed { retryable: true }, Pending { attempt }) => attempt > 1,
      (from, Cancelled) => !from.is_terminal(),
      _ => false,
    };

    if allowed {
      Ok(next)
    } else {
      Err(InvalidTransition {
        from: self,
        to: next,
      })
    }
  }
}

impl fmt::Display for RequestState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Idle => write!(f, "idle"),
      Self::Pending { attempt } => write!(f, "pending(attempt {})", attempt),
      Self::Success => write!(f, "success"),
      Self::Failed { retryable: true } => write!(f, "failed(retryable)"),
      Self::Failed { retryable: false } => write!(f, "failed(final)"),
      Self::Cancelled => write!(f, "cancelled"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::RequestState::*;
  use super::*;

  #[test]
  fn test_happy_path() {
    let s = Idle.transition(Pending { attempt: 1 }).unwrap();
    let s = s.transition(Success).unwrap();
    assert!(s.is_terminal());
  }

  #[test]
  fn test_retry_loop() {
    let s = Idle
      .transition(Pending { attempt: 1 })
      .and_then(|s| s.transition(Failed { retryable: true }))
      .and_then(|s| s.transition(Pending { attempt: 2 }))
      .and_then(|s| s.transition(Failed { retryable: false }))
      .unwrap();
    assert!(s.is_terminal());
  }

  #[test]
  fn test_cancel_from_any_live_state() {
    assert_eq!(Idle.transition(Cancelled), Ok(Cancelled));
    assert_eq!(Pending { attempt: 3 }.transition(Cancelled), Ok(Cancelled));
    assert_eq!(Failed { retryable: true }.transition(Cancelled), Ok(Cancelled));
  }

  #[test]
  fn test_terminal_states_are_final() {
    assert!(Success.transition(Pending { attempt: 1 }).is_err());
    assert!(Cancelled.transition(Cancelled).is_err());
    assert!(Failed { retryable: false }.transition(Pending { attempt: 2 }).is_err());
  }

  #[test]
  fn test_idle_cannot_skip_to_success() {
    let err = Idle.transition(Success).unwrap_err();
    assert_eq!(err.to_string(), "invalid request transition idle -> success");
  }
}
