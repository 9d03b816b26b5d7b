//! Progress reporting for an active drain.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of a sync session as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
  Running,
  /// Both queues were processed until nothing retryable was left or passes ran out
  Finished,
  /// Connectivity dropped; unprocessed items stay queued for the next trigger
  Interrupted,
}

/// What started a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
  /// Connectivity went from offline to online
  Reconnected,
  Foreground,
  /// The `sync_interval` timer fired
  Periodic,
  /// Explicit request from the user or a caller
  Manual,
}

/// Snapshot of drain progress. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSession {
  pub started_at: DateTime<Utc>,
  pub trigger: SyncTrigger,
  pub state: SessionState,
  pub actions_total: usize,
  /// Actions that reached a final outcome (done or permanently failed)
  pub actions_completed: usize,
  pub actions_failed: usize,
  pub notifications_total: usize,
  /// Notifications sent or permanently failed
  pub notifications_processed: usize,
  /// 0.0 ..= 1.0
  pub progress: f64,
}

impl SyncSession {
  pub fn new(started_at: DateTime<Utc>, actions_total: usize, notifications_total: usize) -> Self {
    Self {
      started_at,
      trigger: SyncTrigger::Manual,
      state: SessionState::Running,
      actions_total,
      actions_completed: 0,
      actions_failed: 0,
      notifications_total,
      notifications_processed: 0,
      progress: 0.0,
    }
  }

  pub fn with_trigger(mut self, trigger: SyncTrigger) -> Self {
    self.trigger = trigger;
    self
  }

  pub fn is_running(&self) -> bool {
    self.state == SessionState::Running
  }

  /// Recompute `progress` from the counters.
  pub fn refresh_progress(&mut self) {
    let total = self.actions_total + self.notifications_total;
    let done = self.actions_completed + self.notifications_processed;
    self.progress = match self.state {
      SessionState::Finished => 1.0,
      _ if total == 0 => 0.0,
      _ => (done as f64 / total as f64).clamp(0.0, 1.0),
    };
  }

  pub fn finish(&mut self, state: SessionState) {
    self.state = state;
    self.refresh_progress();
  }
}

/// Which queue an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
  Actions,
  Notifications,
}

/// What happened to one queued item during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
  /// Executed/delivered and removed from the queue
  Completed,
  /// Failed below the retry bound; left for a later pass
  Retrying,
  /// Failed permanently; kept for the user to inspect
  Failed,
}

/// Per-item progress event emitted by the queues while they work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemProgress {
  pub queue: QueueKind,
  pub id: String,
  pub outcome: ItemOutcome,
}

/// Callback the queues report item progress through.
pub type ProgressFn<'a> = &'a (dyn Fn(ItemProgress) + Send + Sync);

/// Progress sink that ignores everything.
pub fn no_progress(_: ItemProgress) {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_progress_moves_from_zero_to_one() {
    let mut session = SyncSession::new(Utc::now(), 3, 1);
    session.refresh_progress();
    assert_eq!(session.progress, 0.0);

    session.actions_completed = 2;
    session.refresh_progress();
    assert!((session.progress - 0.5).abs() < f64::EPSILON);

    session.finish(SessionState::Finished);
    assert_eq!(session.progress, 1.0);
    assert!(!session.is_running());
  }

  #[test]
  fn test_empty_session_finishes_at_one() {
    let mut session = SyncSession::new(Utc::now(), 0, 0);
    session.refresh_progress();
    assert_eq!(session.progress, 0.0);
    session.finish(SessionState::Finished);
    assert_eq!(session.progress, 1.0);
  }

  #[test]
  fn test_interrupted_keeps_partial_progress() {
    let mut session = SyncSession::new(Utc::now(), 4, 0);
    session.actions_completed = 1;
    session.finish(SessionState::Interrupted);
    assert!((session.progress - 0.25).abs() < f64::EPSILON);
  }
}
