//! Durable, priority-ordered queue of offline mutations.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::action::{
  ActionId, ActionReceipt, ActionStatus, ActionType, NewAction, OfflineAction,
};
use super::retry::RetryPolicy;
use super::DrainGuard;
use crate::clock::Clock;
use crate::error::{Result, StorageError, SyncError};
use crate::store::{keys, JsonStoreExt, LocalStore};
use crate::sync::session::{
  no_progress, ItemOutcome, ItemProgress, ProgressFn, QueueKind, SessionState, SyncSession,
};

/// Default bound on a single gateway call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// An action that completed during a drain, with the service's answer.
#[derive(Debug, Clone)]
pub struct CompletedAction {
  pub action: OfflineAction,
  pub receipt: ActionReceipt,
}

/// What one drain pass did.
#[derive(Debug, Default)]
pub struct DrainReport {
  pub completed: Vec<CompletedAction>,
  /// Failed below the retry bound; pending again
  pub retrying: Vec<ActionId>,
  /// Newly marked permanently failed
  pub failed: Vec<ActionId>,
  /// Left untouched because the pass was told to stop
  pub skipped: usize,
  pub interrupted: bool,
}

impl DrainReport {
  pub fn attempted(&self) -> usize {
    self.completed.len() + self.retrying.len() + self.failed.len()
  }
}

#[derive(Debug)]
pub enum DrainOutcome {
  Drained(DrainReport),
  /// Another drain is running; this call did nothing.
  AlreadyDraining(SyncSession),
}

/// Queue of mutations issued while offline.
///
/// Records live in the local store under `actions/`; the queue keeps no
/// in-memory copy, so a new queue over the same store sees exactly what was
/// persisted.
pub struct ActionQueue {
  store: Arc<dyn LocalStore>,
  clock: Arc<dyn Clock>,
  retry: RetryPolicy,
  call_timeout: Duration,
  draining: AtomicBool,
  /// Progress of the running pass, if any
  current: Mutex<Option<SyncSession>>,
}

impl ActionQueue {
  /// Open the queue over `store`, returning interrupted in-flight actions to pending.
  ///
  /// An action left in flight by a crash may or may not have reached the
  /// service; replaying it is safe because the service deduplicates by id.
  pub fn open(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>) -> Result<Self, StorageError> {
    let queue = Self {
      store,
      clock,
      retry: RetryPolicy::actions(),
      call_timeout: DEFAULT_CALL_TIMEOUT,
      draining: AtomicBool::new(false),
      current: Mutex::new(None),
    };

    let mut recovered = 0;
    for mut action in queue.all()? {
      if action.status == ActionStatus::InFlight {
        action.status = ActionStatus::Pending;
        queue.save(&action)?;
        recovered += 1;
      }
    }
    if recovered > 0 {
      warn!(recovered, "Actions were in flight at shutdown, will replay");
    }

    Ok(queue)
  }

  pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
    self.call_timeout = timeout;
    self
  }

  pub fn retry_policy(&self) -> &RetryPolicy {
    &self.retry
  }

  /// Validate and persist a new pending action. Never touches the network.
  pub fn enqueue(&self, new: NewAction) -> Result<OfflineAction> {
    new.validate()?;

    let id = new.id.unwrap_or_else(ActionId::generate);
    if self.get(&id)?.is_some() {
      return Err(SyncError::Validation(format!(
        "action '{}' is already queued",
        id
      )));
    }

    let now = self.clock.now();
    let action = OfflineAction {
      priority: new.priority.unwrap_or_else(|| new.kind.action_type().default_priority()),
      id,
      kind: new.kind,
      created_at: now,
      updated_at: now,
      status: ActionStatus::Pending,
      retry_count: 0,
      seq: self.next_seq()?,
      last_error: None,
      on_success: new.on_success,
    };
    self.save(&action)?;

    info!(
      id = %action.id,
      action_type = %action.action_type(),
      priority = ?action.priority,
      "Action queued"
    );
    Ok(action)
  }

  pub fn get(&self, id: &ActionId) -> Result<Option<OfflineAction>, StorageError> {
    self.store.get_json(&keys::action(id.as_str()))
  }

  /// Every record in enqueue order, whatever its status.
  pub fn all(&self) -> Result<Vec<OfflineAction>, StorageError> {
    let mut actions: Vec<OfflineAction> = self
      .store
      .scan_json(keys::ACTIONS)?
      .into_iter()
      .map(|(_, a)| a)
      .collect();
    actions.sort_by_key(|a| a.seq);
    Ok(actions)
  }

  /// Actions awaiting execution in the order a drain would run them.
  ///
  /// Types in `boosted` go first; then higher priority; then oldest first.
  pub fn pending(&self, boosted: &BTreeSet<ActionType>) -> Result<Vec<OfflineAction>, StorageError> {
    let mut pending: Vec<OfflineAction> = self
      .all()?
      .into_iter()
      .filter(|a| matches!(a.status, ActionStatus::Pending | ActionStatus::InFlight))
      .collect();
    pending.sort_by(|a, b| {
      let a_boost = boosted.contains(&a.action_type());
      let b_boost = boosted.contains(&b.action_type());
      b_boost
        .cmp(&a_boost)
        .then(b.priority.cmp(&a.priority))
        .then(a.created_at.cmp(&b.created_at))
        .then(a.seq.cmp(&b.seq))
    });
    Ok(pending)
  }

  /// Pending plus in-flight actions.
  pub fn pending_count(&self) -> Result<usize, StorageError> {
    Ok(
      self
        .all()?
        .iter()
        .filter(|a| matches!(a.status, ActionStatus::Pending | ActionStatus::InFlight))
        .count(),
    )
  }

  /// Permanently failed actions kept for the user to act on.
  pub fn failed(&self) -> Result<Vec<OfflineAction>, StorageError> {
    Ok(
      self
        .all()?
        .into_iter()
        .filter(|a| a.status == ActionStatus::Failed)
        .collect(),
    )
  }

  /// Give a permanently failed action a fresh retry budget.
  pub fn retry_failed(&self, id: &ActionId) -> Result<OfflineAction> {
    let mut action = self
      .get(id)?
      .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
    if action.status != ActionStatus::Failed {
      return Err(SyncError::Validation(format!(
        "action '{}' has not failed",
        id
      )));
    }
    action.status = ActionStatus::Pending;
    action.retry_count = 0;
    action.updated_at = self.clock.now();
    self.save(&action)?;
    info!(id = %id, "Failed action re-queued by user");
    Ok(action)
  }

  /// Remove an action on the user's request. In-flight actions cannot be discarded.
  pub fn discard(&self, id: &ActionId) -> Result<OfflineAction> {
    let action = self
      .get(id)?
      .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
    if action.status == ActionStatus::InFlight && self.is_draining() {
      return Err(SyncError::Validation(format!(
        "action '{}' is being executed",
        id
      )));
    }
    self.store.remove(&keys::action(id.as_str()))?;
    info!(id = %id, status = ?action.status, "Action discarded by user");
    Ok(action)
  }

  pub fn is_draining(&self) -> bool {
    self.draining.load(Ordering::Acquire)
  }

  /// Progress of the running pass, if one is running.
  pub fn current_session(&self) -> Option<SyncSession> {
    self.current.lock().ok().and_then(|s| s.clone())
  }

  /// Run one pass over every pending action.
  pub async fn drain<F, Fut>(&self, executor: F) -> Result<DrainOutcome>
  where
    F: FnMut(OfflineAction) -> Fut,
    Fut: Future<Output = Result<ActionReceipt>>,
  {
    self
      .drain_while(&BTreeSet::new(), &|| true, &no_progress, executor)
      .await
  }

  /// Run one pass, checking `keep_going` before each dispatch.
  ///
  /// A dispatched action always runs until it returns or its timeout fires.
  /// When `keep_going` turns false the rest of the pass is left pending.
  pub async fn drain_while<F, Fut>(
    &self,
    boosted: &BTreeSet<ActionType>,
    keep_going: &(dyn Fn() -> bool + Send + Sync),
    on_progress: ProgressFn<'_>,
    mut executor: F,
  ) -> Result<DrainOutcome>
  where
    F: FnMut(OfflineAction) -> Fut,
    Fut: Future<Output = Result<ActionReceipt>>,
  {
    if self.draining.swap(true, Ordering::AcqRel) {
      let session = self
        .current_session()
        .unwrap_or_else(|| SyncSession::new(self.clock.now(), 0, 0));
      debug!("Drain already running, returning its progress");
      return Ok(DrainOutcome::AlreadyDraining(session));
    }
    let _guard = DrainGuard::new(&self.draining, &self.current);

    let batch = self.pending(boosted)?;
    let mut session = SyncSession::new(self.clock.now(), batch.len(), 0);
    self.publish(&session);

    let mut report = DrainReport::default();
    if batch.is_empty() {
      return Ok(DrainOutcome::Drained(report));
    }
    info!(pending = batch.len(), "Draining action queue");

    let total = batch.len();
    for (index, queued) in batch.into_iter().enumerate() {
      if !keep_going() {
        report.interrupted = true;
        report.skipped = total - index;
        info!(skipped = report.skipped, "Drain stopped, remaining actions stay pending");
        break;
      }

      // The user may have discarded or retried it since the pass started.
      let Some(mut action) = self.get(&queued.id)? else {
        continue;
      };
      if !matches!(action.status, ActionStatus::Pending | ActionStatus::InFlight) {
        continue;
      }

      action.status = ActionStatus::InFlight;
      action.updated_at = self.clock.now();
      self.save(&action)?;
      debug!(id = %action.id, action_type = %action.action_type(), "Dispatching action");

      let result = match tokio::time::timeout(self.call_timeout, executor(action.clone())).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(self.call_timeout)),
      };

      let outcome = match result {
        Ok(receipt) => {
          self.store.remove(&keys::action(action.id.as_str()))?;
          debug!(id = %action.id, duplicate = receipt.duplicate, "Action completed");
          report.completed.push(CompletedAction {
            action: action.clone(),
            receipt,
          });
          ItemOutcome::Completed
        }
        Err(SyncError::Storage(e)) => {
          // Local durability failure: leave the record for recovery and surface it.
          return Err(SyncError::Storage(e));
        }
        Err(e) => {
          action.retry_count += 1;
          action.last_error = Some(e.to_string());
          action.updated_at = self.clock.now();
          let outcome = if e.is_transient() && !self.retry.is_exhausted(action.retry_count) {
            action.status = ActionStatus::Pending;
            warn!(
              id = %action.id,
              attempt = action.retry_count,
              max_attempts = self.retry.max_attempts,
              error = %e,
              "Action failed, will retry"
            );
            report.retrying.push(action.id.clone());
            ItemOutcome::Retrying
          } else {
            action.status = ActionStatus::Failed;
            warn!(
              id = %action.id,
              attempts = action.retry_count,
              error = %e,
              "Action failed permanently"
            );
            report.failed.push(action.id.clone());
            session.actions_failed += 1;
            ItemOutcome::Failed
          };
          self.save(&action)?;
          outcome
        }
      };

      if outcome != ItemOutcome::Retrying {
        session.actions_completed += 1;
      }
      session.refresh_progress();
      self.publish(&session);
      on_progress(ItemProgress {
        queue: QueueKind::Actions,
        id: action.id.to_string(),
        outcome,
      });
    }

    session.finish(if report.interrupted {
      SessionState::Interrupted
    } else {
      SessionState::Finished
    });
    info!(
      completed = report.completed.len(),
      retrying = report.retrying.len(),
      failed = report.failed.len(),
      skipped = report.skipped,
      "Action drain pass finished"
    );
    Ok(DrainOutcome::Drained(report))
  }

  fn save(&self, action: &OfflineAction) -> Result<(), StorageError> {
    self.store.put_json(&keys::action(action.id.as_str()), action)
  }

  fn next_seq(&self) -> Result<u64, StorageError> {
    Ok(self.all()?.last().map(|a| a.seq + 1).unwrap_or(0))
  }

  fn publish(&self, session: &SyncSession) {
    if let Ok(mut current) = self.current.lock() {
      *current = Some(session.clone());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::queue::action::{ActionKind, PaymentPayload, Priority, ReminderPayload};
  use crate::store::MemoryStore;
  use chrono::{Duration as ChronoDuration, TimeZone, Utc};
  use std::collections::HashSet;

  fn setup() -> (ActionQueue, ManualClock, MemoryStore) {
    let store = MemoryStore::new();
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 7, 1, 10, 0, 0).unwrap());
    let queue = ActionQueue::open(Arc::new(store.clone()), Arc::new(clock.clone()))
      .unwrap()
      .with_retry_policy(RetryPolicy::without_backoff(5));
    (queue, clock, store)
  }

  fn payment(id: &str, amount: u64) -> NewAction {
    NewAction::new(ActionKind::Payment(PaymentPayload {
      group_id: "g1".into(),
      member_id: "m1".into(),
      amount,
      currency: Some("KES".into()),
      reference: None,
    }))
    .with_id(id)
  }

  fn reminder(id: &str) -> NewAction {
    NewAction::new(ActionKind::Reminder(ReminderPayload {
      group_id: "g1".into(),
      member_id: "m2".into(),
      note: "Contribution due Friday".into(),
      due_at: None,
    }))
    .with_id(id)
  }

  async fn drain_ok(queue: &ActionQueue, order: &Mutex<Vec<String>>) -> DrainReport {
    let outcome = queue
      .drain(|action| {
        order.lock().unwrap().push(action.id.to_string());
        async { Ok(ActionReceipt::default()) }
      })
      .await
      .unwrap();
    match outcome {
      DrainOutcome::Drained(report) => report,
      DrainOutcome::AlreadyDraining(_) => panic!("unexpected concurrent drain"),
    }
  }

  #[test]
  fn test_enqueue_assigns_id_and_persists_pending() {
    let (queue, clock, _) = setup();
    let new = NewAction { id: None, ..payment("ignored", 50) };

    let action = queue.enqueue(new).unwrap();
    assert!(!action.id.as_str().is_empty());
    assert_eq!(action.status, ActionStatus::Pending);
    assert_eq!(action.priority, Priority::High);
    assert_eq!(action.created_at, clock.now());
    assert_eq!(queue.pending_count().unwrap(), 1);
    assert_eq!(queue.get(&action.id).unwrap(), Some(action));
  }

  #[test]
  fn test_invalid_payload_never_enters_queue() {
    let (queue, _, store) = setup();
    let err = queue.enqueue(payment("a1", 0)).unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert!(store.is_empty());
  }

  #[test]
  fn test_duplicate_id_is_rejected() {
    let (queue, _, _) = setup();
    queue.enqueue(payment("a1", 50)).unwrap();
    assert!(matches!(
      queue.enqueue(payment("a1", 70)),
      Err(SyncError::Validation(_))
    ));
    assert_eq!(queue.pending_count().unwrap(), 1);
  }

  #[test]
  fn test_enqueue_survives_reload() {
    let (queue, clock, store) = setup();
    let queued = queue.enqueue(payment("a1", 50)).unwrap();
    drop(queue);

    let reloaded = ActionQueue::open(Arc::new(store), Arc::new(clock)).unwrap();
    let pending = reloaded.pending(&BTreeSet::new()).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, queued.id);
    assert_eq!(pending[0].kind, queued.kind);
  }

  #[test]
  fn test_in_flight_actions_recover_as_pending() {
    let (queue, clock, store) = setup();
    let mut action = queue.enqueue(payment("a1", 50)).unwrap();
    action.status = ActionStatus::InFlight;
    store.put_json("actions/a1", &action).unwrap();

    let reloaded = ActionQueue::open(Arc::new(store), Arc::new(clock)).unwrap();
    let recovered = reloaded.get(&"a1".into()).unwrap().unwrap();
    assert_eq!(recovered.status, ActionStatus::Pending);
  }

  #[tokio::test]
  async fn test_priority_beats_age() {
    let (queue, clock, _) = setup();
    queue.enqueue(reminder("b-low-old")).unwrap();
    clock.advance(ChronoDuration::minutes(5));
    queue.enqueue(payment("a-high-new", 50)).unwrap();

    let order = Mutex::new(Vec::new());
    drain_ok(&queue, &order).await;
    assert_eq!(*order.lock().unwrap(), vec!["a-high-new", "b-low-old"]);
  }

  #[tokio::test]
  async fn test_fifo_within_priority_class() {
    let (queue, clock, _) = setup();
    for id in ["p1", "p2", "p3"] {
      queue.enqueue(payment(id, 10)).unwrap();
      clock.advance(ChronoDuration::seconds(1));
    }
    // Same timestamp falls back to enqueue order
    queue.enqueue(payment("p4", 10)).unwrap();
    queue.enqueue(payment("p5", 10)).unwrap();

    let order = Mutex::new(Vec::new());
    drain_ok(&queue, &order).await;
    assert_eq!(*order.lock().unwrap(), vec!["p1", "p2", "p3", "p4", "p5"]);
  }

  #[tokio::test]
  async fn test_boosted_types_run_first() {
    let (queue, _, _) = setup();
    queue.enqueue(payment("pay", 10)).unwrap();
    queue.enqueue(reminder("rem")).unwrap();

    let boosted: BTreeSet<ActionType> = [ActionType::Reminder].into_iter().collect();
    let ids: Vec<String> = queue
      .pending(&boosted)
      .unwrap()
      .into_iter()
      .map(|a| a.id.to_string())
      .collect();
    assert_eq!(ids, vec!["rem", "pay"]);
  }

  #[tokio::test]
  async fn test_success_removes_action() {
    let (queue, _, store) = setup();
    queue.enqueue(payment("a1", 50)).unwrap();

    let order = Mutex::new(Vec::new());
    let report = drain_ok(&queue, &order).await;
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.completed[0].action.id.as_str(), "a1");
    assert_eq!(queue.pending_count().unwrap(), 0);
    assert!(store.is_empty());
  }

  #[tokio::test]
  async fn test_bounded_retry_marks_permanent_failure() {
    let (queue, _, _) = setup();
    queue.enqueue(payment("a1", 50)).unwrap();
    let calls = Mutex::new(0u32);

    for pass in 1..=5 {
      let outcome = queue
        .drain(|_| {
          *calls.lock().unwrap() += 1;
          async { Err(SyncError::Network("connection reset".into())) }
        })
        .await
        .unwrap();
      let DrainOutcome::Drained(report) = outcome else {
        panic!("unexpected concurrent drain");
      };
      if pass < 5 {
        assert_eq!(report.retrying.len(), 1);
      } else {
        assert_eq!(report.failed.len(), 1);
      }
    }

    let failed = queue.failed().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 5);
    assert!(failed[0].last_error.as_deref().unwrap().contains("connection reset"));
    assert_eq!(queue.pending_count().unwrap(), 0);

    // Never auto-retried again
    let order = Mutex::new(Vec::new());
    drain_ok(&queue, &order).await;
    assert!(order.lock().unwrap().is_empty());
    assert_eq!(*calls.lock().unwrap(), 5);
  }

  #[tokio::test]
  async fn test_rejection_fails_immediately() {
    let (queue, _, _) = setup();
    queue.enqueue(payment("a1", 5_000)).unwrap();

    queue
      .drain(|_| async { Err(SyncError::Rejected("insufficient balance".into())) })
      .await
      .unwrap();

    let failed = queue.failed().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 1);
    assert!(failed[0].last_error.as_deref().unwrap().contains("insufficient balance"));
  }

  #[tokio::test]
  async fn test_failure_does_not_block_rest_of_pass() {
    let (queue, _, _) = setup();
    queue.enqueue(payment("bad", 10)).unwrap();
    queue.enqueue(payment("good", 10)).unwrap();

    let outcome = queue
      .drain(|action| async move {
        if action.id.as_str() == "bad" {
          Err(SyncError::Network("boom".into()))
        } else {
          Ok(ActionReceipt::default())
        }
      })
      .await
      .unwrap();
    let DrainOutcome::Drained(report) = outcome else {
      panic!("unexpected concurrent drain");
    };
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.retrying, vec![ActionId::from("bad")]);
    assert_eq!(queue.pending_count().unwrap(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeout_counts_as_failure() {
    let (queue, _, _) = setup();
    let queue = queue.with_call_timeout(Duration::from_secs(1));
    queue.enqueue(payment("slow", 10)).unwrap();

    queue
      .drain(|_| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(ActionReceipt::default())
      })
      .await
      .unwrap();

    let action = queue.get(&"slow".into()).unwrap().unwrap();
    assert_eq!(action.status, ActionStatus::Pending);
    assert_eq!(action.retry_count, 1);
    assert!(action.last_error.unwrap().contains("timed out"));
  }

  #[tokio::test]
  async fn test_stop_leaves_remaining_pending() {
    let (queue, _, _) = setup();
    for id in ["p1", "p2", "p3"] {
      queue.enqueue(payment(id, 10)).unwrap();
    }

    let dispatched = Mutex::new(0usize);
    let keep_going = || *dispatched.lock().unwrap() < 1;
    let outcome = queue
      .drain_while(&BTreeSet::new(), &keep_going, &no_progress, |_| {
        *dispatched.lock().unwrap() += 1;
        async { Ok(ActionReceipt::default()) }
      })
      .await
      .unwrap();

    let DrainOutcome::Drained(report) = outcome else {
      panic!("unexpected concurrent drain");
    };
    assert!(report.interrupted);
    assert_eq!(report.skipped, 2);
    assert_eq!(queue.pending_count().unwrap(), 2);
  }

  #[tokio::test]
  async fn test_reentrant_drain_is_a_noop() {
    let (queue, _, _) = setup();
    queue.enqueue(payment("a1", 10)).unwrap();
    queue.enqueue(payment("a2", 10)).unwrap();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let release_rx = Mutex::new(Some(release_rx));

    let first = queue.drain(|_| {
      let rx = release_rx.lock().unwrap().take();
      async move {
        if let Some(rx) = rx {
          let _ = rx.await;
        }
        Ok(ActionReceipt::default())
      }
    });

    let second = async {
      tokio::task::yield_now().await;
      let outcome = queue
        .drain(|_| async { Err(SyncError::Validation("second drain executed".into())) })
        .await
        .unwrap();
      let _ = release_tx.send(());
      outcome
    };

    let (first, second) = tokio::join!(first, second);
    match second {
      DrainOutcome::AlreadyDraining(session) => {
        assert_eq!(session.actions_total, 2);
        assert_eq!(session.actions_completed, 0);
      }
      DrainOutcome::Drained(_) => panic!("second drain should have been a no-op"),
    }
    let DrainOutcome::Drained(report) = first.unwrap() else {
      panic!("first drain should run");
    };
    assert_eq!(report.completed.len(), 2);
    assert!(!queue.is_draining());
  }

  #[tokio::test]
  async fn test_replay_against_deduplicating_gateway_applies_once() {
    let (queue, clock, store) = setup();
    queue.enqueue(payment("a1", 50)).unwrap();
    let applied: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
    let balance = Mutex::new(0u64);

    let execute = |action: OfflineAction| {
      let first_time = applied.lock().unwrap().insert(action.id.to_string());
      if first_time {
        if let ActionKind::Payment(p) = &action.kind {
          *balance.lock().unwrap() += p.amount;
        }
      }
      async move {
        Ok::<_, SyncError>(ActionReceipt {
          duplicate: !first_time,
          updates: vec![],
        })
      }
    };

    // Simulate a crash after the service applied the payment but before the
    // queue removed it: the record is still in flight on reopen.
    let mut in_flight = queue.get(&"a1".into()).unwrap().unwrap();
    execute(in_flight.clone()).await.unwrap();
    in_flight.status = ActionStatus::InFlight;
    store.put_json("actions/a1", &in_flight).unwrap();

    let reopened = ActionQueue::open(Arc::new(store), Arc::new(clock)).unwrap();
    let outcome = reopened.drain(execute).await.unwrap();
    let DrainOutcome::Drained(report) = outcome else {
      panic!("unexpected concurrent drain");
    };
    assert!(report.completed[0].receipt.duplicate);
    assert_eq!(*balance.lock().unwrap(), 50);
    assert_eq!(reopened.pending_count().unwrap(), 0);
  }

  #[test]
  fn test_retry_and_discard_failed() {
    let (queue, _, _) = setup();
    let mut action = queue.enqueue(payment("a1", 50)).unwrap();
    assert!(queue.retry_failed(&action.id).is_err());

    action.status = ActionStatus::Failed;
    action.retry_count = 5;
    queue.save(&action).unwrap();

    let retried = queue.retry_failed(&action.id).unwrap();
    assert_eq!(retried.status, ActionStatus::Pending);
    assert_eq!(retried.retry_count, 0);

    queue.discard(&action.id).unwrap();
    assert!(queue.get(&action.id).unwrap().is_none());
    assert!(matches!(
      queue.discard(&action.id),
      Err(SyncError::NotFound(_))
    ));
  }
}
