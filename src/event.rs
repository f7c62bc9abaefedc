use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Application events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// One line of input
  Line(String),
  /// Input closed
  Eof,
  /// Periodic tick for query polling
  Tick,
}

/// Event handler that produces events from line input and a tick timer
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Read lines from stdin.
  pub fn stdin(tick_rate: Duration) -> Self {
    Self::new(BufReader::new(tokio::io::stdin()), tick_rate)
  }

  /// Create a new event handler over `input` with the given tick rate
  pub fn new<R>(input: R, tick_rate: Duration) -> Self
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn input reader
    let input_tx = tx.clone();
    tokio::spawn(async move {
      let mut lines = input.lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            if input_tx.send(Event::Line(line)).is_err() {
              break;
            }
          }
          // Read errors end input the same way EOF does
          Ok(None) | Err(_) => {
            let _ = input_tx.send(Event::Eof);
            break;
          }
        }
      }
    });

    // Spawn ticker
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(tick_rate);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
      loop {
        ticker.tick().await;
        if tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn next_input(events: &mut EventHandler) -> Option<Event> {
    loop {
      match events.next().await? {
        Event::Tick => continue,
        other => return Some(other),
      }
    }
  }

  #[tokio::test]
  async fn test_lines_then_eof() {
    let input: &[u8] = b"tes\ntesla\n";
    let mut events = EventHandler::new(input, Duration::from_millis(50));

    assert_eq!(next_input(&mut events).await, Some(Event::Line("tes".into())));
    assert_eq!(next_input(&mut events).await, Some(Event::Line("tesla".into())));
    assert_eq!(next_input(&mut events).await, Some(Event::Eof));
  }

  #[tokio::test(start_paused = true)]
  async fn test_ticks_keep_coming() {
    let input: &[u8] = b"";
    let mut events = EventHandler::new(input, Duration::from_millis(100));

    let mut ticks = 0;
    while ticks < 3 {
      if events.next().await == Some(Event::Tick) {
        ticks += 1;
      }
    }
    assert_eq!(ticks, 3);
  }
}
