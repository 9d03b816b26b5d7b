//! Durable outbound queues: offline mutations and notifications.
//!
//! Both queues are explicitly constructed objects over the shared local store
//! and are handed to the orchestrator by `Arc`. Neither keeps module-level
//! state, and neither retries inside a pass.

pub mod action;
pub mod actions;
pub mod notification;
pub mod notifications;
pub mod retry;

pub use action::{
  ActionId, ActionKind, ActionReceipt, ActionStatus, ActionType, CommitmentPayload,
  ContributionCycle, DocumentPayload, EntityUpdate, NewAction, OfflineAction, PaymentPayload,
  Priority, ReminderPayload,
};
pub use actions::{ActionQueue, CompletedAction, DrainOutcome, DrainReport};
pub use notification::{Channel, NotificationDraft, NotificationItem, NotificationStatus};
pub use notifications::{NotificationQueue, ProcessOutcome, ProcessReport, ThrottlePolicy};
pub use retry::RetryPolicy;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// RAII guard that clears a queue's busy flag and progress snapshot.
pub(crate) struct DrainGuard<'a, T> {
  flag: &'a AtomicBool,
  current: &'a Mutex<Option<T>>,
}

impl<'a, T> DrainGuard<'a, T> {
  pub(crate) fn new(flag: &'a AtomicBool, current: &'a Mutex<Option<T>>) -> Self {
    Self { flag, current }
  }
}

impl<T> Drop for DrainGuard<'_, T> {
  fn drop(&mut self) {
    if let Ok(mut current) = self.current.lock() {
      *current = None;
    }
    self.flag.store(false, Ordering::Release);
  }
}
