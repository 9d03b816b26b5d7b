//! Retry bounds and backoff between drain passes.
//!
//! Failures are never retried inside a pass. An item that fails goes back to
//! its queue, and the orchestrator waits `delay_after(pass)` before starting
//! the next pass, so transient outages are absorbed without hammering the
//! remote service.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Failures after which an item is marked permanently failed
  pub max_attempts: u32,
  pub initial_delay: Duration,
  pub max_delay: Duration,
  pub factor: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::actions()
  }
}

impl RetryPolicy {
  /// Offline mutations: five attempts, backoff from 2 seconds capped at 5 minutes.
  #[must_use]
  pub fn actions() -> Self {
    Self {
      max_attempts: 5,
      initial_delay: Duration::from_secs(2),
      max_delay: Duration::from_secs(300),
      factor: 2.0,
    }
  }

  /// Outbound notifications: three attempts, quicker backoff.
  #[must_use]
  pub fn notifications() -> Self {
    Self {
      max_attempts: 3,
      initial_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(60),
      factor: 2.0,
    }
  }

  /// Same bound, no waiting between passes.
  #[must_use]
  pub fn without_backoff(max_attempts: u32) -> Self {
    Self {
      max_attempts,
      initial_delay: Duration::ZERO,
      max_delay: Duration::ZERO,
      factor: 1.0,
    }
  }

  /// Whether an item with this many failures must stop being retried.
  pub fn is_exhausted(&self, retry_count: u32) -> bool {
    retry_count >= self.max_attempts
  }

  /// Delay before the pass following `failed_passes` unsuccessful ones.
  pub fn delay_after(&self, failed_passes: u32) -> Duration {
    if failed_passes == 0 {
      return Duration::ZERO;
    }
    let exp = (failed_passes - 1).min(32) as i32;
    let delay = self.initial_delay.mul_f64(self.factor.powi(exp));
    delay.min(self.max_delay)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_exhaustion_at_bound() {
    let policy = RetryPolicy::actions();
    assert!(!policy.is_exhausted(4));
    assert!(policy.is_exhausted(5));
    assert!(policy.is_exhausted(6));
    assert!(RetryPolicy::notifications().is_exhausted(3));
  }

  #[test]
  fn test_backoff_grows_and_caps() {
    let policy = RetryPolicy::actions();
    assert_eq!(policy.delay_after(0), Duration::ZERO);
    assert_eq!(policy.delay_after(1), Duration::from_secs(2));
    assert_eq!(policy.delay_after(2), Duration::from_secs(4));
    assert_eq!(policy.delay_after(3), Duration::from_secs(8));
    assert_eq!(policy.delay_after(20), Duration::from_secs(300));
    assert_eq!(policy.delay_after(u32::MAX), Duration::from_secs(300));
  }

  #[test]
  fn test_without_backoff_never_waits() {
    let policy = RetryPolicy::without_backoff(5);
    assert_eq!(policy.delay_after(3), Duration::ZERO);
    assert_eq!(policy.max_attempts, 5);
  }
}
