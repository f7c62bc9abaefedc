//! Debounced values for search-as-you-type.

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::trace;

/// Publishes an input value only once it has stayed unchanged for `delay`.
///
/// Every `set` restarts the window, so of several inputs arriving within one
/// window only the last is ever published. Must be created inside a tokio
/// runtime; the background task stops when the debouncer is dropped.
pub struct Debouncer<T> {
  input: mpsc::UnboundedSender<T>,
  output: watch::Receiver<T>,
  task: JoinHandle<()>,
}

impl<T: Clone + Send + Sync + 'static> Debouncer<T> {
  pub fn new(initial: T, delay: Duration) -> Self {
    let (input, mut rx) = mpsc::unbounded_channel::<T>();
    let (tx, output) = watch::channel(initial);

    let task = tokio::spawn(async move {
      while let Some(mut pending) = rx.recv().await {
        loop {
          tokio::select! {
            next = rx.recv() => match next {
              Some(value) => pending = value,
              None => return,
            },
            _ = tokio::time::sleep(delay) => break,
          }
        }
        trace!("Debounced value settled");
        tx.send_replace(pending);
      }
    });

    Self {
      input,
      output,
      task,
    }
  }

  /// Feed a new input value, restarting the window.
  pub fn set(&self, value: T) {
    // The task only exits once this sender is dropped
    let _ = self.input.send(value);
  }

  /// The last settled value.
  pub fn get(&self) -> T {
    self.output.borrow().clone()
  }

  /// A receiver that sees every settled value.
  pub fn subscribe(&self) -> watch::Receiver<T> {
    self.output.clone()
  }

  /// Wait for the next settled value.
  pub async fn changed(&mut self) -> Option<T> {
    self.output.changed().await.ok()?;
    Some(self.output.borrow_and_update().clone())
  }
}

impl<T> Drop for Debouncer<T> {
  fn drop(&mut self) {
    self.task.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::time::{sleep, Instant};

  const DELAY: Duration = Duration::from_millis(300);

  #[tokio::test(start_paused = true)]
  async fn test_burst_settles_once_on_last_value() {
    let debouncer = Debouncer::new(String::new(), DELAY);
    let mut rx = debouncer.subscribe();
    let start = Instant::now();

    for (i, text) in ["a", "ap", "app", "appl"].iter().enumerate() {
      if i > 0 {
        sleep(Duration::from_millis(50)).await;
      }
      debouncer.set(text.to_string());
    }

    // Last input at t=150ms, nothing may settle before t=450ms.
    sleep(Duration::from_millis(299)).await;
    assert!(!rx.has_changed().unwrap());

    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), "appl");
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(450), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(452), "{:?}", elapsed);

    // Exactly one emission for the burst.
    sleep(Duration::from_secs(5)).await;
    assert!(!rx.has_changed().unwrap());
  }

  #[tokio::test(start_paused = true)]
  async fn test_value_is_held_until_window_passes() {
    let mut debouncer = Debouncer::new(0, DELAY);

    debouncer.set(1);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(debouncer.get(), 0);

    assert_eq!(debouncer.changed().await, Some(1));
    assert_eq!(debouncer.get(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_separate_periods_emit_separately() {
    let mut debouncer = Debouncer::new(0, DELAY);

    debouncer.set(1);
    assert_eq!(debouncer.changed().await, Some(1));

    sleep(Duration::from_secs(1)).await;
    debouncer.set(2);
    assert_eq!(debouncer.changed().await, Some(2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_steady_input_never_settles() {
    let debouncer = Debouncer::new(0, DELAY);
    let rx = debouncer.subscribe();

    for i in 1..=10 {
      debouncer.set(i);
      sleep(Duration::from_millis(200)).await;
    }
    assert!(!rx.has_changed().unwrap());
    assert_eq!(debouncer.get(), 0);
  }
}
