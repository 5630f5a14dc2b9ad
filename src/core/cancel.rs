//! Cooperative cancellation shared by the tool runner and the poll waiter

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Cancellation flag plus an optional overall deadline.
///
/// Clones share the flag, so the Ctrl-C handler can hold one clone while the
/// apply pipeline checks another.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  flag: Arc<AtomicBool>,
  deadline: Option<Instant>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  /// Token that also reports cancelled once `limit` has elapsed from now
  pub fn with_deadline(mut self, limit: Duration) -> Self {
    self.deadline = Some(Instant::now() + limit);
    self
  }

  pub fn cancel(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
  }

  /// Time left before the deadline, if one is set
  pub fn remaining(&self) -> Option<Duration> {
    self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_clones_share_flag() {
    let token = CancelToken::new();
    let handler_copy = token.clone();
    assert!(!token.is_cancelled());
    handler_copy.cancel();
    assert!(token.is_cancelled());
  }

  #[test]
  fn test_expired_deadline_cancels() {
    let token = CancelToken::new().with_deadline(Duration::ZERO);
    assert!(token.is_cancelled());
    assert_eq!(token.remaining(), Some(Duration::ZERO));
  }

  #[test]
  fn test_no_deadline() {
    let token = CancelToken::new();
    assert_eq!(token.remaining(), None);
    assert!(!token.is_cancelled());
  }
}
