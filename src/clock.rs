//! Wall-clock abstraction so freshness and ordering can be tested deterministically.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Source of "now" for timestamps written by the cache and the queues.
pub trait Clock: Send + Sync + fmt::Debug {
  fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
  now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Arc::new(Mutex::new(start)),
    }
  }

  pub fn set(&self, to: DateTime<Utc>) {
    if let Ok(mut now) = self.now.lock() {
      *now = to;
    }
  }

  pub fn advance(&self, by: Duration) {
    if let Ok(mut now) = self.now.lock() {
      *now += by;
    }
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    // A poisoned lock still holds a valid timestamp.
    match self.now.lock() {
      Ok(now) => *now,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_manual_clock_advances() {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
    let clock = ManualClock::new(start);
    assert_eq!(clock.now(), start);

    clock.advance(Duration::hours(2));
    assert_eq!(clock.now(), start + Duration::hours(2));

    let shared = clock.clone();
    shared.set(start);
    assert_eq!(clock.now(), start);
  }
}
