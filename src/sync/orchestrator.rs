//! Drives both queues against the remote service and keeps the cache honest.

use chrono::{DateTime, Utc};
use futures::channel::mpsc;
use futures::Stream;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::connectivity::{ConnectivityMonitor, NetworkStatus};
use super::gateway::{self, RemoteGateway};
use super::session::{ItemOutcome, ItemProgress, QueueKind, SessionState, SyncSession, SyncTrigger};
use crate::cache::{CacheManager, EntitySummary, EntrySource};
use crate::clock::Clock;
use crate::error::{Result, StorageError, SyncError};
use crate::queue::actions::DEFAULT_CALL_TIMEOUT;
use crate::queue::{
  ActionId, ActionQueue, ActionReceipt, ActionStatus, CompletedAction, DrainOutcome, NewAction,
  NotificationDraft, NotificationItem, NotificationQueue, OfflineAction, ProcessOutcome,
  RetryPolicy,
};
use crate::settings::SyncSettings;
use crate::store::{keys, JsonStoreExt, LocalStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorState {
  Idle,
  Draining,
}

/// Session-level tuning. Per-item retry bounds live on the queues.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
  /// Passes per session before leaving still-failing items for the next trigger
  pub max_passes: u32,
  /// Wait between passes that made no headway
  pub backoff: RetryPolicy,
  /// Bound on a direct (non-queued) submission
  pub call_timeout: Duration,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      max_passes: 6,
      backoff: RetryPolicy::actions(),
      call_timeout: DEFAULT_CALL_TIMEOUT,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  Offline,
  /// `sync_on_wifi_only` is set and the device is on cellular
  MeteredNetwork,
  /// An automatic trigger fired with `auto_sync` off
  AutoSyncDisabled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
  Completed(SyncSession),
  /// A session was already running; this is its latest snapshot.
  AlreadyRunning(SyncSession),
  Skipped(SkipReason),
}

/// What happened to a submitted action.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
  /// Executed immediately against the remote service
  Applied(ActionReceipt),
  /// Stored for a later sync; the cache shows it optimistically
  Queued(OfflineAction),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSummary {
  pub pending_actions: usize,
  pub failed_actions: usize,
  pub queued_notifications: usize,
  pub failed_notifications: usize,
  pub state: OrchestratorState,
  pub last_full_sync: Option<DateTime<Utc>>,
}

/// Coordinates the action queue, the notification queue and the cache.
///
/// Holds no global state: hosts construct one per store and share it by `Arc`.
pub struct SyncOrchestrator {
  actions: Arc<ActionQueue>,
  notifications: Arc<NotificationQueue>,
  cache: CacheManager,
  store: Arc<dyn LocalStore>,
  gateway: Arc<dyn RemoteGateway>,
  connectivity: Arc<dyn ConnectivityMonitor>,
  clock: Arc<dyn Clock>,
  options: SyncOptions,
  settings: watch::Sender<SyncSettings>,
  state: watch::Sender<OrchestratorState>,
  /// Latest snapshot of the running or last finished session
  session: watch::Sender<Option<SyncSession>>,
  running: AtomicBool,
  /// Held for any gateway call on an action, direct or queued
  dispatch: tokio::sync::Mutex<()>,
  listener: Mutex<Option<JoinHandle<()>>>,
}

struct SessionGuard<'a> {
  running: &'a AtomicBool,
  state: &'a watch::Sender<OrchestratorState>,
}

impl Drop for SessionGuard<'_> {
  fn drop(&mut self) {
    self.state.send_replace(OrchestratorState::Idle);
    self.running.store(false, Ordering::Release);
  }
}

/// Folds per-item events from both queues into one session snapshot.
struct ProgressTracker {
  session: SyncSession,
  actions_seen: HashSet<String>,
  actions_done: HashSet<String>,
  notifications_seen: HashSet<String>,
  notifications_done: HashSet<String>,
}

impl ProgressTracker {
  fn new(session: SyncSession) -> Self {
    Self {
      session,
      actions_seen: HashSet::new(),
      actions_done: HashSet::new(),
      notifications_seen: HashSet::new(),
      notifications_done: HashSet::new(),
    }
  }

  fn record(&mut self, item: ItemProgress) {
    let terminal = item.outcome != ItemOutcome::Retrying;
    match item.queue {
      QueueKind::Actions => {
        if item.outcome == ItemOutcome::Failed && !self.actions_done.contains(&item.id) {
          self.session.actions_failed += 1;
        }
        self.actions_seen.insert(item.id.clone());
        if terminal {
          self.actions_done.insert(item.id);
        }
        // Actions queued after the session started still count.
        self.session.actions_total = self.session.actions_total.max(self.actions_seen.len());
        self.session.actions_completed = self.actions_done.len();
      }
      QueueKind::Notifications => {
        self.notifications_seen.insert(item.id.clone());
        if terminal {
          self.notifications_done.insert(item.id);
        }
        self.session.notifications_total = self
          .session
          .notifications_total
          .max(self.notifications_seen.len());
        self.session.notifications_processed = self.notifications_done.len();
      }
    }
    self.session.refresh_progress();
  }
}

impl SyncOrchestrator {
  /// Open both queues over `store` with default policies.
  pub fn new(
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    gateway: Arc<dyn RemoteGateway>,
    connectivity: Arc<dyn ConnectivityMonitor>,
  ) -> Result<Self, StorageError> {
    let actions = ActionQueue::open(Arc::clone(&store), Arc::clone(&clock))?;
    let notifications = NotificationQueue::open(Arc::clone(&store), Arc::clone(&clock));
    let cache = CacheManager::new(Arc::clone(&store), Arc::clone(&clock));
    let settings = SyncSettings::load(store.as_ref())?;

    Ok(Self {
      actions: Arc::new(actions),
      notifications: Arc::new(notifications),
      cache,
      store,
      gateway,
      connectivity,
      clock,
      options: SyncOptions::default(),
      settings: watch::Sender::new(settings),
      state: watch::Sender::new(OrchestratorState::Idle),
      session: watch::Sender::new(None),
      running: AtomicBool::new(false),
      dispatch: tokio::sync::Mutex::new(()),
      listener: Mutex::new(None),
    })
  }

  pub fn with_options(mut self, options: SyncOptions) -> Self {
    self.options = options;
    self
  }

  /// Replace the default action queue, e.g. with a tuned retry policy.
  pub fn with_action_queue(mut self, queue: ActionQueue) -> Self {
    self.actions = Arc::new(queue);
    self
  }

  pub fn with_notification_queue(mut self, queue: NotificationQueue) -> Self {
    self.notifications = Arc::new(queue);
    self
  }

  pub fn with_cache(mut self, cache: CacheManager) -> Self {
    self.cache = cache;
    self
  }

  pub fn actions(&self) -> &Arc<ActionQueue> {
    &self.actions
  }

  pub fn notifications(&self) -> &Arc<NotificationQueue> {
    &self.notifications
  }

  pub fn cache(&self) -> &CacheManager {
    &self.cache
  }

  pub fn state(&self) -> OrchestratorState {
    *self.state.borrow()
  }

  pub fn watch_state(&self) -> watch::Receiver<OrchestratorState> {
    self.state.subscribe()
  }

  /// Latest session snapshot, running or finished.
  pub fn current_session(&self) -> Option<SyncSession> {
    self.session.borrow().clone()
  }

  pub fn settings(&self) -> SyncSettings {
    self.settings.borrow().clone()
  }

  /// Listen for reconnects and run periodic syncs until [`shutdown`](Self::shutdown).
  pub fn start(self: &Arc<Self>) {
    let mut status_rx = self.connectivity.subscribe();
    let mut settings_rx = self.settings.subscribe();
    // Read before spawning so a change racing the spawn is still seen as a change.
    let mut previous = *status_rx.borrow_and_update();
    let this = Arc::clone(self);

    let handle = tokio::spawn(async move {
      let mut next_tick = this.next_tick();
      info!(status = %previous, "Sync listener started");

      loop {
        let tick = async move {
          match next_tick {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
          }
        };

        tokio::select! {
          changed = status_rx.changed() => {
            if changed.is_err() {
              break;
            }
            let status = *status_rx.borrow_and_update();
            let reconnected = !previous.is_online() && status.is_online();
            debug!(from = %previous, to = %status, "Connectivity changed");
            previous = status;
            if reconnected {
              this.spawn_sync(SyncTrigger::Reconnected);
            }
          }
          changed = settings_rx.changed() => {
            if changed.is_err() {
              break;
            }
            next_tick = this.next_tick();
          }
          _ = tick => {
            next_tick = this.next_tick();
            this.spawn_sync(SyncTrigger::Periodic);
          }
        }
      }
    });

    if let Ok(mut listener) = self.listener.lock() {
      if let Some(old) = listener.replace(handle) {
        old.abort();
      }
    }
  }

  /// Stop listening. A session already running finishes on its own.
  pub fn shutdown(&self) {
    if let Ok(mut listener) = self.listener.lock() {
      if let Some(handle) = listener.take() {
        handle.abort();
        info!("Sync listener stopped");
      }
    }
  }

  fn next_tick(&self) -> Option<Instant> {
    self
      .settings
      .borrow()
      .auto_sync_period()
      .map(|period| Instant::now() + period)
  }

  fn spawn_sync(self: &Arc<Self>, trigger: SyncTrigger) {
    let this = Arc::clone(self);
    tokio::spawn(async move {
      if let Err(e) = this.sync(trigger).await {
        warn!(trigger = ?trigger, error = %e, "Sync session failed");
      }
    });
  }

  /// Start a sync and stream its progress.
  ///
  /// The stream ends after the final snapshot. It ends without items when the
  /// sync was skipped.
  pub fn trigger_sync(self: &Arc<Self>) -> impl Stream<Item = SyncSession> + Send + Unpin {
    let (tx, rx) = mpsc::unbounded();
    let this = Arc::clone(self);

    tokio::spawn(async move {
      match this.run_session(SyncTrigger::Manual, Some(&tx)).await {
        Ok(SyncOutcome::Completed(_)) => {}
        Ok(SyncOutcome::AlreadyRunning(_)) => this.follow_running_session(&tx).await,
        Ok(SyncOutcome::Skipped(reason)) => info!(reason = ?reason, "Sync skipped"),
        Err(e) => warn!(error = %e, "Sync session failed"),
      }
    });

    rx
  }

  async fn follow_running_session(&self, tx: &mpsc::UnboundedSender<SyncSession>) {
    let mut rx = self.session.subscribe();
    loop {
      let snapshot = rx.borrow_and_update().clone();
      if let Some(session) = snapshot {
        let running = session.is_running();
        if tx.unbounded_send(session).is_err() || !running {
          return;
        }
      }
      if rx.changed().await.is_err() {
        return;
      }
    }
  }

  /// Run a sync now, regardless of `auto_sync`.
  pub async fn sync_now(&self) -> Result<SyncOutcome> {
    self.sync(SyncTrigger::Manual).await
  }

  /// App came to the foreground.
  pub async fn on_foreground(&self) -> Result<SyncOutcome> {
    self.sync(SyncTrigger::Foreground).await
  }

  async fn sync(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
    self.run_session(trigger, None).await
  }

  fn skip_reason(&self, trigger: SyncTrigger) -> Option<SkipReason> {
    let settings = self.settings.borrow();
    let status = self.connectivity.current();
    if trigger != SyncTrigger::Manual && !settings.auto_sync {
      Some(SkipReason::AutoSyncDisabled)
    } else if !status.is_online() {
      Some(SkipReason::Offline)
    } else if settings.sync_on_wifi_only && status.is_metered() {
      Some(SkipReason::MeteredNetwork)
    } else {
      None
    }
  }

  async fn run_session(
    &self,
    trigger: SyncTrigger,
    observer: Option<&mpsc::UnboundedSender<SyncSession>>,
  ) -> Result<SyncOutcome> {
    if let Some(reason) = self.skip_reason(trigger) {
      debug!(trigger = ?trigger, reason = ?reason, "Sync skipped");
      return Ok(SyncOutcome::Skipped(reason));
    }
    if self.running.swap(true, Ordering::AcqRel) {
      let snapshot = self
        .current_session()
        .unwrap_or_else(|| SyncSession::new(self.clock.now(), 0, 0).with_trigger(trigger));
      return Ok(SyncOutcome::AlreadyRunning(snapshot));
    }
    let _guard = SessionGuard {
      running: &self.running,
      state: &self.state,
    };
    self.state.send_replace(OrchestratorState::Draining);
    // A direct submission still in flight finishes first.
    let _dispatch = self.dispatch.lock().await;

    let settings = self.settings();
    let session = SyncSession::new(
      self.clock.now(),
      self.actions.pending_count()?,
      self.notifications.queued_count()?,
    )
    .with_trigger(trigger);
    info!(
      trigger = ?trigger,
      actions = session.actions_total,
      notifications = session.notifications_total,
      "Sync session started"
    );
    self.publish(&session, observer);

    let tracker = Mutex::new(ProgressTracker::new(session));
    let on_progress = |item: ItemProgress| {
      if let Ok(mut tracker) = tracker.lock() {
        tracker.record(item);
        self.publish(&tracker.session, observer);
      }
    };
    let keep_going = || self.connectivity.current().is_online();
    // Collected as calls succeed, so a storage failure later in the session
    // cannot leave confirmed actions marked optimistic.
    let confirmed: Mutex<Vec<CompletedAction>> = Mutex::new(Vec::new());
    let executor = |action: OfflineAction| {
      let confirmed = &confirmed;
      async move {
        let result = self.execute_action(action.clone()).await;
        if let (Ok(receipt), Ok(mut done)) = (&result, confirmed.lock()) {
          done.push(CompletedAction {
            action,
            receipt: receipt.clone(),
          });
        }
        result
      }
    };
    let sender = |item: NotificationItem| self.deliver(item);

    let mut failure: Option<SyncError> = None;
    let mut interrupted = false;
    let mut stalled_passes = 0u32;
    let mut pass = 0u32;

    loop {
      pass += 1;
      let (drained, processed) = tokio::join!(
        self
          .actions
          .drain_while(&settings.channel_priority, &keep_going, &on_progress, &executor),
        self
          .notifications
          .process_while(&keep_going, &on_progress, &sender),
      );

      let mut made_headway = false;
      let mut failures = false;
      match drained {
        Ok(DrainOutcome::Drained(report)) => {
          interrupted |= report.interrupted;
          failures |= !report.retrying.is_empty();
          made_headway |= !report.completed.is_empty() || !report.failed.is_empty();
        }
        Ok(DrainOutcome::AlreadyDraining(_)) => debug!("Action queue busy, skipping this pass"),
        Err(e) => {
          failure.get_or_insert(e);
        }
      }
      match processed {
        Ok(ProcessOutcome::Processed(report)) => {
          interrupted |= report.interrupted;
          failures |= !report.retrying.is_empty();
          made_headway |= !report.sent.is_empty() || !report.failed.is_empty();
        }
        Ok(ProcessOutcome::AlreadyProcessing) => {
          debug!("Notification queue busy, skipping this pass")
        }
        Err(e) => {
          failure.get_or_insert(e);
        }
      }

      if failure.is_some() {
        break;
      }
      if interrupted || !keep_going() {
        interrupted = true;
        info!(pass, "Connectivity lost, sync interrupted");
        break;
      }
      let remaining = self.actions.pending_count()? + self.notifications.queued_count()?;
      if remaining == 0 {
        break;
      }
      if pass >= self.options.max_passes {
        info!(pass, remaining, "Pass limit reached, leaving items for the next sync");
        break;
      }

      if failures || !made_headway {
        stalled_passes += 1;
      } else {
        stalled_passes = 0;
      }
      let delay = self.options.backoff.delay_after(stalled_passes);
      debug!(pass, remaining, delay_ms = delay.as_millis() as u64, "Starting another pass");
      tokio::time::sleep(delay).await;
    }

    let completed = match confirmed.into_inner() {
      Ok(completed) => completed,
      Err(poisoned) => poisoned.into_inner(),
    };
    let finished_at = self.clock.now();
    self.reconcile(&completed, finished_at)?;

    let mut session = match tracker.into_inner() {
      Ok(tracker) => tracker.session,
      Err(poisoned) => poisoned.into_inner().session,
    };
    if let Some(e) = failure {
      session.finish(SessionState::Interrupted);
      self.publish(&session, observer);
      warn!(pass, error = %e, "Sync session aborted");
      return Err(e);
    }
    if interrupted {
      session.finish(SessionState::Interrupted);
    } else {
      self.store.put_json(keys::LAST_FULL_SYNC, &finished_at)?;
      self.cache.prune_older_than(settings.retention())?;
      session.finish(SessionState::Finished);
    }
    self.publish(&session, observer);

    info!(
      trigger = ?trigger,
      state = ?session.state,
      passes = pass,
      actions_completed = session.actions_completed,
      actions_failed = session.actions_failed,
      notifications_processed = session.notifications_processed,
      "Sync session ended"
    );
    Ok(SyncOutcome::Completed(session))
  }

  fn publish(&self, session: &SyncSession, observer: Option<&mpsc::UnboundedSender<SyncSession>>) {
    self.session.send_replace(Some(session.clone()));
    if let Some(tx) = observer {
      // A dropped stream only means nobody is watching.
      let _ = tx.unbounded_send(session.clone());
    }
  }

  async fn execute_action(&self, action: OfflineAction) -> Result<ActionReceipt> {
    let receipt = gateway::execute(self.gateway.as_ref(), &action).await?;
    self.queue_follow_ups(&action)?;
    Ok(receipt)
  }

  async fn deliver(&self, item: NotificationItem) -> Result<()> {
    gateway::deliver(self.gateway.as_ref(), &item).await
  }

  /// Queue an action's success notifications under ids derived from the action,
  /// so a replayed action does not notify twice.
  fn queue_follow_ups(&self, action: &OfflineAction) -> Result<()> {
    for (index, draft) in action.on_success.iter().enumerate() {
      let id = format!("{}-n{}", action.id, index);
      self.notifications.enqueue_with_id(&id, draft.clone())?;
    }
    Ok(())
  }

  /// Replace optimistic entries with confirmed state, all stamped `at`.
  fn reconcile(&self, completed: &[CompletedAction], at: DateTime<Utc>) -> Result<()> {
    for done in completed {
      self.confirm(&done.action, &done.receipt, at)?;
    }
    if !completed.is_empty() {
      debug!(actions = completed.len(), at = %at, "Cache reconciled");
    }
    Ok(())
  }

  fn confirm(&self, action: &OfflineAction, receipt: &ActionReceipt, at: DateTime<Utc>) -> Result<()> {
    let (entity_type, entity_id) = action.cache_slot();
    let payload = match self.cache.read(entity_type, entity_id)? {
      Some(entry) => entry.payload,
      None => action.kind.to_json()?,
    };
    self
      .cache
      .write_at(entity_type, entity_id, payload, None, at, EntrySource::Remote)?;

    for update in &receipt.updates {
      self.cache.write_at(
        &update.entity_type,
        &update.entity_id,
        update.payload.clone(),
        None,
        at,
        EntrySource::Remote,
      )?;
    }
    Ok(())
  }

  /// Run a mutation now if nothing is ahead of it, otherwise queue it.
  ///
  /// A direct call that fails transiently is queued instead, under the same id.
  /// A rejection is returned to the caller and nothing is queued.
  pub async fn submit(&self, mut new: NewAction) -> Result<SubmitOutcome> {
    new.validate()?;
    let id = new.id.get_or_insert_with(ActionId::generate).clone();

    let online = self.connectivity.current().is_online();
    let idle = !self.running.load(Ordering::Acquire) && !self.actions.is_draining();
    // Held until the action is applied or queued, so a sync cannot overtake it.
    let dispatch = if online && idle && self.actions.pending_count()? == 0 {
      self.dispatch.try_lock().ok()
    } else {
      None
    };
    if dispatch.is_some() {
      let now = self.clock.now();
      let action = OfflineAction {
        id: id.clone(),
        priority: new
          .priority
          .unwrap_or_else(|| new.kind.action_type().default_priority()),
        kind: new.kind.clone(),
        created_at: now,
        updated_at: now,
        status: ActionStatus::InFlight,
        retry_count: 0,
        seq: 0,
        last_error: None,
        on_success: new.on_success.clone(),
      };

      let timeout = self.options.call_timeout;
      let result = match tokio::time::timeout(timeout, self.execute_action(action.clone())).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(timeout)),
      };
      match result {
        Ok(receipt) => {
          self.confirm(&action, &receipt, self.clock.now())?;
          info!(id = %id, action_type = %action.action_type(), "Action applied directly");
          return Ok(SubmitOutcome::Applied(receipt));
        }
        Err(e) if e.is_transient() => {
          warn!(id = %id, error = %e, "Direct submission failed, queueing");
        }
        Err(e) => return Err(e),
      }
    }

    let action = self.actions.enqueue(new)?;
    let (entity_type, entity_id) = action.cache_slot();
    self
      .cache
      .write_optimistic(entity_type, entity_id, action.kind.to_json()?)?;
    Ok(SubmitOutcome::Queued(action))
  }

  /// Queue a notification for the next sync.
  pub fn notify(&self, draft: NotificationDraft) -> Result<NotificationItem> {
    self.notifications.enqueue(draft)
  }

  pub fn queue_summary(&self) -> Result<QueueSummary> {
    Ok(QueueSummary {
      pending_actions: self.actions.pending_count()?,
      failed_actions: self.actions.failed()?.len(),
      queued_notifications: self.notifications.queued_count()?,
      failed_notifications: self.notifications.failed()?.len(),
      state: self.state(),
      last_full_sync: self.last_full_sync()?,
    })
  }

  pub fn cache_summary(&self) -> Result<BTreeMap<String, EntitySummary>> {
    Ok(self.cache.summarize()?)
  }

  /// Drop cached entities. Queued actions and notifications are untouched.
  pub fn clear_cache(&self) -> Result<usize> {
    Ok(self.cache.evict_all()?)
  }

  /// Validate, persist and apply new settings.
  pub fn update_sync_settings(&self, settings: SyncSettings) -> Result<()> {
    settings.validate()?;
    settings.save(self.store.as_ref())?;
    info!(
      auto_sync = settings.auto_sync,
      wifi_only = settings.sync_on_wifi_only,
      interval = %settings.sync_interval,
      "Sync settings updated"
    );
    self.settings.send_replace(settings);
    Ok(())
  }

  pub fn last_full_sync(&self) -> Result<Option<DateTime<Utc>>> {
    Ok(self.store.get_json(keys::LAST_FULL_SYNC)?)
  }

  pub fn network_status(&self) -> NetworkStatus {
    self.connectivity.current()
  }

  pub fn failed_actions(&self) -> Result<Vec<OfflineAction>> {
    Ok(self.actions.failed()?)
  }

  pub fn retry_action(&self, id: &ActionId) -> Result<OfflineAction> {
    self.actions.retry_failed(id)
  }

  /// Discard a queued action and its optimistic cache entry.
  pub fn discard_action(&self, id: &ActionId) -> Result<OfflineAction> {
    let action = self.actions.discard(id)?;
    let (entity_type, entity_id) = action.cache_slot();
    if let Some(entry) = self.cache.read(entity_type, entity_id)? {
      if entry.source == EntrySource::Optimistic {
        self.cache.evict(entity_type, entity_id)?;
      }
    }
    Ok(action)
  }

  pub fn failed_notifications(&self) -> Result<Vec<NotificationItem>> {
    Ok(self.notifications.failed()?)
  }

  pub fn retry_notification(&self, id: &str) -> Result<NotificationItem> {
    self.notifications.retry_failed(id)
  }

  pub fn discard_notification(&self, id: &str) -> Result<NotificationItem> {
    self.notifications.discard(id)
  }
}
