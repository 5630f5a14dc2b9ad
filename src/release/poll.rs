//! Bounded polling with backoff
//!
//! [`PollWaiter`] is the one retry loop in relay. The CI gate and the registry
//! wait both run on it with their own check function, backoff policy and
//! deadline. Time comes from a [`Clock`], so tests drive it with
//! [`FakeClock`] and never sleep.

use crate::core::cancel::CancelToken;
use crate::core::error::RelayError;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Longest single sleep, so cancellation is noticed promptly
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Back-to-back check errors tolerated before a wait gives up
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Monotonic time source
pub trait Clock: Send + Sync {
  /// Time since the clock was created
  fn now(&self) -> Duration;
  fn sleep(&self, duration: Duration);
}

#[derive(Debug)]
pub struct SystemClock {
  origin: Instant,
}

impl SystemClock {
  pub fn new() -> Self {
    Self { origin: Instant::now() }
  }
}

impl Default for SystemClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for SystemClock {
  fn now(&self) -> Duration {
    self.origin.elapsed()
  }

  fn sleep(&self, duration: Duration) {
    std::thread::sleep(duration);
  }
}

/// Clock that advances only when slept on
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FakeClock {
  now: Mutex<Duration>,
  sleeps: Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl FakeClock {
  pub fn new() -> Self {
    Self::default()
  }

  /// Every sleep requested so far
  pub fn sleeps(&self) -> Vec<Duration> {
    self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
  }
}

#[cfg(test)]
impl Clock for FakeClock {
  fn now(&self) -> Duration {
    self.now.lock().map(|n| *n).unwrap_or_default()
  }

  fn sleep(&self, duration: Duration) {
    if let Ok(mut now) = self.now.lock() {
      *now += duration;
    }
    if let Ok(mut sleeps) = self.sleeps.lock() {
      sleeps.push(duration);
    }
  }
}

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
  pub initial: Duration,
  pub multiplier: f64,
  pub max: Duration,
}

impl BackoffPolicy {
  /// Same delay every time
  pub fn fixed(interval: Duration) -> Self {
    Self {
      initial: interval,
      multiplier: 1.0,
      max: interval,
    }
  }

  pub fn exponential(initial: Duration, multiplier: f64, max: Duration) -> Self {
    Self { initial, multiplier, max }
  }

  /// Delay after the given attempt (1-based), capped at `max`
  pub fn delay(&self, attempt: u32) -> Duration {
    let pow = attempt.saturating_sub(1).min(32) as i32;
    let secs = self.initial.as_secs_f64() * self.multiplier.powi(pow);
    if !secs.is_finite() || secs >= self.max.as_secs_f64() {
      return self.max;
    }
    Duration::from_secs_f64(secs)
  }
}

/// Outcome of one check
#[derive(Debug)]
pub enum Poll<T, E> {
  Ready(T),
  Pending,
  /// Permanent failure; stop polling
  Failed(E),
}

/// Why a wait ended without a result
#[derive(Debug, PartialEq, Eq)]
pub enum PollError<E> {
  TimedOut { attempts: u32, elapsed: Duration },
  Failed(E),
  Cancelled { attempts: u32 },
}

/// Turns check errors into retries until too many arrive in a row
///
/// A provider or tool error (network blip, 5xx, `git ls-remote` hiccup) is
/// logged and polled again. Cancellation is never retried.
#[derive(Debug)]
pub struct ErrorStreak {
  limit: u32,
  count: u32,
}

impl ErrorStreak {
  pub fn new(limit: u32) -> Self {
    Self { limit, count: 0 }
  }

  /// A check succeeded
  pub fn reset(&mut self) {
    self.count = 0;
  }

  /// Pending while under the limit, Failed once it is reached
  pub fn record<T>(&mut self, err: RelayError, during: &str) -> Poll<T, RelayError> {
    if err.is_cancellation() {
      return Poll::Failed(err);
    }
    self.count += 1;
    if self.count >= self.limit {
      tracing::warn!(during, errors = self.count, error = %err, "giving up after repeated errors");
      return Poll::Failed(err);
    }
    tracing::warn!(during, errors = self.count, error = %err, "check failed, retrying");
    Poll::Pending
  }
}

impl Default for ErrorStreak {
  fn default() -> Self {
    Self::new(MAX_CONSECUTIVE_ERRORS)
  }
}

pub struct PollWaiter<'a> {
  policy: BackoffPolicy,
  deadline: Duration,
  clock: &'a dyn Clock,
  cancel: &'a CancelToken,
}

impl<'a> PollWaiter<'a> {
  pub fn new(policy: BackoffPolicy, deadline: Duration, clock: &'a dyn Clock, cancel: &'a CancelToken) -> Self {
    Self {
      policy,
      deadline,
      clock,
      cancel,
    }
  }

  /// Call `check` until it is ready, fails, the deadline passes or the run is
  /// cancelled. `check` receives the 1-based attempt number.
  pub fn wait<T, E>(&self, mut check: impl FnMut(u32) -> Poll<T, E>) -> Result<T, PollError<E>> {
    let started = self.clock.now();
    let mut attempts = 0;

    loop {
      if self.cancel.is_cancelled() {
        return Err(PollError::Cancelled { attempts });
      }

      attempts += 1;
      match check(attempts) {
        Poll::Ready(value) => return Ok(value),
        Poll::Failed(err) => return Err(PollError::Failed(err)),
        Poll::Pending => {}
      }

      let elapsed = self.clock.now().saturating_sub(started);
      if elapsed >= self.deadline {
        return Err(PollError::TimedOut { attempts, elapsed });
      }

      let delay = self.policy.delay(attempts).min(self.deadline - elapsed);
      tracing::trace!(attempt = attempts, delay_ms = delay.as_millis() as u64, "poll pending");
      self.sleep(delay);
    }
  }

  fn sleep(&self, delay: Duration) {
    let mut left = delay;
    while !left.is_zero() && !self.cancel.is_cancelled() {
      let slice = left.min(SLEEP_SLICE);
      self.clock.sleep(slice);
      left -= slice;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
  }

  #[test]
  fn test_exponential_delay_is_capped() {
    let policy = BackoffPolicy::exponential(secs(5), 2.0, secs(60));
    assert_eq!(policy.delay(1), secs(5));
    assert_eq!(policy.delay(2), secs(10));
    assert_eq!(policy.delay(3), secs(20));
    assert_eq!(policy.delay(4), secs(40));
    assert_eq!(policy.delay(5), secs(60));
    assert_eq!(policy.delay(500), secs(60));
  }

  #[test]
  fn test_ready_after_pending() {
    let clock = FakeClock::new();
    let cancel = CancelToken::new();
    let waiter = PollWaiter::new(BackoffPolicy::fixed(secs(10)), secs(300), &clock, &cancel);

    let result: Result<u32, PollError<()>> = waiter.wait(|attempt| {
      if attempt < 3 { Poll::Pending } else { Poll::Ready(attempt) }
    });
    assert_eq!(result, Ok(3));
    assert_eq!(clock.now(), secs(20));
  }

  #[test]
  fn test_failure_stops_immediately() {
    let clock = FakeClock::new();
    let cancel = CancelToken::new();
    let waiter = PollWaiter::new(BackoffPolicy::fixed(secs(10)), secs(300), &clock, &cancel);

    let result: Result<(), PollError<&str>> = waiter.wait(|_| Poll::Failed("red"));
    assert_eq!(result, Err(PollError::Failed("red")));
    assert!(clock.sleeps().is_empty());
  }

  #[test]
  fn test_deadline_bounds_total_wait() {
    let clock = FakeClock::new();
    let cancel = CancelToken::new();
    let waiter = PollWaiter::new(BackoffPolicy::exponential(secs(5), 2.0, secs(60)), secs(100), &clock, &cancel);

    let result: Result<(), PollError<()>> = waiter.wait(|_| Poll::Pending);
    match result {
      Err(PollError::TimedOut { attempts, elapsed }) => {
        // 5 + 10 + 20 + 40 = 75, then the last delay is clipped to 25
        assert_eq!(attempts, 6);
        assert_eq!(elapsed, secs(100));
      }
      other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(clock.now(), secs(100));
  }

  #[test]
  fn test_cancelled_before_first_attempt() {
    let clock = FakeClock::new();
    let cancel = CancelToken::new();
    cancel.cancel();
    let waiter = PollWaiter::new(BackoffPolicy::fixed(secs(1)), secs(10), &clock, &cancel);

    let mut called = false;
    let result: Result<(), PollError<()>> = waiter.wait(|_| {
      called = true;
      Poll::Pending
    });
    assert_eq!(result, Err(PollError::Cancelled { attempts: 0 }));
    assert!(!called);
  }

  #[test]
  fn test_error_streak_retries_until_limit() {
    let clock = FakeClock::new();
    let cancel = CancelToken::new();
    let waiter = PollWaiter::new(BackoffPolicy::fixed(secs(10)), secs(600), &clock, &cancel);

    let mut streak = ErrorStreak::new(3);
    let result: Result<(), PollError<RelayError>> =
      waiter.wait(|_| streak.record(RelayError::message("HTTP 502"), "listing"));
    match result {
      Err(PollError::Failed(e)) => assert!(e.to_string().contains("HTTP 502")),
      other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(clock.now(), secs(20));
  }

  #[test]
  fn test_error_streak_resets_on_success() {
    let clock = FakeClock::new();
    let cancel = CancelToken::new();
    let waiter = PollWaiter::new(BackoffPolicy::fixed(secs(10)), secs(600), &clock, &cancel);

    let mut streak = ErrorStreak::new(2);
    let result: Result<u32, PollError<RelayError>> = waiter.wait(|attempt| match attempt {
      1 | 3 => streak.record(RelayError::message("timeout"), "listing"),
      2 => {
        streak.reset();
        Poll::Pending
      }
      n => Poll::Ready(n),
    });
    assert_eq!(result.unwrap(), 4);
  }

  #[test]
  fn test_cancel_from_check_stops_loop() {
    let clock = FakeClock::new();
    let cancel = CancelToken::new();
    let waiter = PollWaiter::new(BackoffPolicy::fixed(secs(30)), secs(600), &clock, &cancel);

    let result: Result<(), PollError<()>> = waiter.wait(|attempt| {
      if attempt == 2 {
        cancel.cancel();
      }
      Poll::Pending
    });
    assert_eq!(result, Err(PollError::Cancelled { attempts: 2 }));
  }
}
