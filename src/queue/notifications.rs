//! Durable per-channel queue of outbound notifications.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::notification::{Channel, NotificationDraft, NotificationItem, NotificationStatus};
use super::retry::RetryPolicy;
use super::DrainGuard;
use crate::clock::Clock;
use crate::error::{Result, StorageError, SyncError};
use crate::store::{keys, JsonStoreExt, LocalStore};
use crate::sync::session::{no_progress, ItemOutcome, ItemProgress, ProgressFn, QueueKind};

/// Per-channel pacing applied within one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottlePolicy {
  /// Sends attempted per channel per pass; the rest wait for the next pass
  pub max_per_pass: usize,
  /// Pause between consecutive sends on one channel
  pub send_interval: Duration,
}

impl Default for ThrottlePolicy {
  fn default() -> Self {
    Self {
      max_per_pass: 50,
      send_interval: Duration::ZERO,
    }
  }
}

/// What one processing pass did, summed over channels.
#[derive(Debug, Default, PartialEq)]
pub struct ProcessReport {
  pub sent: Vec<String>,
  /// Failed below the retry bound; still at the head of their channel
  pub retrying: Vec<String>,
  /// Newly marked failed
  pub failed: Vec<String>,
  /// Held behind a retrying head-of-line item
  pub blocked: usize,
  /// Left for the next pass by the per-pass limit
  pub throttled: usize,
  pub interrupted: bool,
}

impl ProcessReport {
  fn merge(&mut self, other: ProcessReport) {
    self.sent.extend(other.sent);
    self.retrying.extend(other.retrying);
    self.failed.extend(other.failed);
    self.blocked += other.blocked;
    self.throttled += other.throttled;
    self.interrupted |= other.interrupted;
  }
}

#[derive(Debug, PartialEq)]
pub enum ProcessOutcome {
  Processed(ProcessReport),
  /// Another pass is running; this call did nothing.
  AlreadyProcessing,
}

/// Queue of outbound notifications, FIFO within each channel.
pub struct NotificationQueue {
  store: Arc<dyn LocalStore>,
  clock: Arc<dyn Clock>,
  retry: RetryPolicy,
  throttle: ThrottlePolicy,
  call_timeout: Duration,
  processing: AtomicBool,
  /// (processed, total) for the running pass
  current: Mutex<Option<(usize, usize)>>,
}

impl NotificationQueue {
  pub fn open(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      clock,
      retry: RetryPolicy::notifications(),
      throttle: ThrottlePolicy::default(),
      call_timeout: super::actions::DEFAULT_CALL_TIMEOUT,
      processing: AtomicBool::new(false),
      current: Mutex::new(None),
    }
  }

  pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn with_throttle(mut self, throttle: ThrottlePolicy) -> Self {
    self.throttle = throttle;
    self
  }

  pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
    self.call_timeout = timeout;
    self
  }

  pub fn retry_policy(&self) -> &RetryPolicy {
    &self.retry
  }

  /// Validate and persist a notification under a generated id.
  pub fn enqueue(&self, draft: NotificationDraft) -> Result<NotificationItem> {
    let id = uuid::Uuid::new_v4().to_string();
    self.enqueue_with_id(&id, draft)
  }

  /// Persist a notification under a caller-chosen id.
  ///
  /// Enqueueing an id that is already present returns the existing item, so
  /// follow-ups of a replayed action are not queued twice.
  pub fn enqueue_with_id(&self, id: &str, draft: NotificationDraft) -> Result<NotificationItem> {
    draft.validate()?;
    if id.trim().is_empty() {
      return Err(SyncError::Validation("notification id must not be empty".into()));
    }
    if let Some(existing) = self.get(id)? {
      debug!(id, "Notification already queued");
      return Ok(existing);
    }

    let now = self.clock.now();
    let item = NotificationItem {
      id: id.to_string(),
      channel: draft.channel,
      recipient_id: draft.recipient_id,
      message: draft.message,
      created_at: now,
      updated_at: now,
      retry_count: 0,
      status: NotificationStatus::Queued,
      seq: self.next_seq()?,
      last_error: None,
    };
    self.save(&item)?;
    info!(id = %item.id, channel = %item.channel, "Notification queued");
    Ok(item)
  }

  pub fn get(&self, id: &str) -> Result<Option<NotificationItem>, StorageError> {
    self.store.get_json(&keys::notification(id))
  }

  /// Every record ordered by creation time, whatever its status.
  pub fn all(&self) -> Result<Vec<NotificationItem>, StorageError> {
    let mut items: Vec<NotificationItem> = self
      .store
      .scan_json(keys::NOTIFICATIONS)?
      .into_iter()
      .map(|(_, n)| n)
      .collect();
    items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
    Ok(items)
  }

  /// Queued items for one channel, head first.
  pub fn queued(&self, channel: Channel) -> Result<Vec<NotificationItem>, StorageError> {
    Ok(
      self
        .all()?
        .into_iter()
        .filter(|n| n.channel == channel && n.status == NotificationStatus::Queued)
        .collect(),
    )
  }

  pub fn queued_count(&self) -> Result<usize, StorageError> {
    Ok(
      self
        .all()?
        .iter()
        .filter(|n| n.status == NotificationStatus::Queued)
        .count(),
    )
  }

  pub fn failed(&self) -> Result<Vec<NotificationItem>, StorageError> {
    Ok(
      self
        .all()?
        .into_iter()
        .filter(|n| n.status == NotificationStatus::Failed)
        .collect(),
    )
  }

  /// Put a failed notification back in its channel with a fresh retry budget.
  ///
  /// It keeps its original position, so it goes out before anything queued later.
  pub fn retry_failed(&self, id: &str) -> Result<NotificationItem> {
    let mut item = self
      .get(id)?
      .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
    if item.status != NotificationStatus::Failed {
      return Err(SyncError::Validation(format!(
        "notification '{}' has not failed",
        id
      )));
    }
    item.status = NotificationStatus::Queued;
    item.retry_count = 0;
    item.updated_at = self.clock.now();
    self.save(&item)?;
    info!(id, channel = %item.channel, "Failed notification re-queued by user");
    Ok(item)
  }

  pub fn discard(&self, id: &str) -> Result<NotificationItem> {
    let item = self
      .get(id)?
      .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
    self.store.remove(&keys::notification(id))?;
    info!(id, status = ?item.status, "Notification discarded by user");
    Ok(item)
  }

  pub fn is_processing(&self) -> bool {
    self.processing.load(Ordering::Acquire)
  }

  /// (processed, total) of the running pass, if one is running.
  pub fn in_progress(&self) -> Option<(usize, usize)> {
    self.current.lock().ok().and_then(|c| *c)
  }

  /// Run one pass over every channel.
  pub async fn process<S, Fut>(&self, sender: S) -> Result<ProcessOutcome>
  where
    S: Fn(NotificationItem) -> Fut + Sync,
    Fut: Future<Output = Result<()>>,
  {
    self.process_while(&|| true, &no_progress, sender).await
  }

  /// Run one pass, channels concurrently, each channel strictly in order.
  ///
  /// A failed head-of-line item stops its channel for the rest of the pass;
  /// items behind it are never sent ahead of it.
  pub async fn process_while<S, Fut>(
    &self,
    keep_going: &(dyn Fn() -> bool + Send + Sync),
    on_progress: ProgressFn<'_>,
    sender: S,
  ) -> Result<ProcessOutcome>
  where
    S: Fn(NotificationItem) -> Fut + Sync,
    Fut: Future<Output = Result<()>>,
  {
    if self.processing.swap(true, Ordering::AcqRel) {
      debug!("Notification pass already running");
      return Ok(ProcessOutcome::AlreadyProcessing);
    }
    let _guard = DrainGuard::new(&self.processing, &self.current);

    let mut by_channel: BTreeMap<Channel, Vec<NotificationItem>> = BTreeMap::new();
    for item in self.all()? {
      if item.status == NotificationStatus::Queued {
        by_channel.entry(item.channel).or_default().push(item);
      }
    }
    let total: usize = by_channel.values().map(Vec::len).sum();
    if total == 0 {
      return Ok(ProcessOutcome::Processed(ProcessReport::default()));
    }
    self.set_progress(0, total);
    info!(queued = total, channels = by_channel.len(), "Processing notification queue");

    let processed = AtomicUsize::new(0);
    let passes = by_channel.into_iter().map(|(channel, items)| {
      self.process_channel(channel, items, keep_going, on_progress, &sender, &processed, total)
    });

    let mut report = ProcessReport::default();
    let mut first_error = None;
    for result in join_all(passes).await {
      match result {
        Ok(channel_report) => report.merge(channel_report),
        Err(e) => {
          first_error.get_or_insert(e);
        }
      }
    }
    if let Some(e) = first_error {
      return Err(e);
    }

    info!(
      sent = report.sent.len(),
      retrying = report.retrying.len(),
      failed = report.failed.len(),
      throttled = report.throttled,
      "Notification pass finished"
    );
    Ok(ProcessOutcome::Processed(report))
  }

  #[allow(clippy::too_many_arguments)]
  async fn process_channel<S, Fut>(
    &self,
    channel: Channel,
    items: Vec<NotificationItem>,
    keep_going: &(dyn Fn() -> bool + Send + Sync),
    on_progress: ProgressFn<'_>,
    sender: &S,
    processed: &AtomicUsize,
    total: usize,
  ) -> Result<ProcessReport>
  where
    S: Fn(NotificationItem) -> Fut + Sync,
    Fut: Future<Output = Result<()>>,
  {
    let mut report = ProcessReport::default();
    let count = items.len();

    for (index, mut item) in items.into_iter().enumerate() {
      if index >= self.throttle.max_per_pass {
        report.throttled = count - index;
        debug!(channel = %channel, deferred = report.throttled, "Channel throttled for this pass");
        break;
      }
      if !keep_going() {
        report.interrupted = true;
        break;
      }
      if index > 0 && !self.throttle.send_interval.is_zero() {
        tokio::time::sleep(self.throttle.send_interval).await;
      }

      debug!(id = %item.id, channel = %channel, "Sending notification");
      let result = match tokio::time::timeout(self.call_timeout, sender(item.clone())).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(self.call_timeout)),
      };

      // The user may have discarded it while the send was in flight.
      let discarded = result.is_err() && self.get(&item.id)?.is_none();

      let mut stop_channel = false;
      let outcome = match result {
        Ok(()) => {
          self.store.remove(&keys::notification(&item.id))?;
          report.sent.push(item.id.clone());
          ItemOutcome::Completed
        }
        Err(SyncError::Storage(e)) => return Err(SyncError::Storage(e)),
        Err(e) if discarded => {
          info!(
            id = %item.id,
            channel = %channel,
            error = %e,
            "Discarded notification failed to send, dropping"
          );
          ItemOutcome::Failed
        }
        Err(e) => {
          item.retry_count += 1;
          item.last_error = Some(e.to_string());
          item.updated_at = self.clock.now();
          if e.is_transient() && !self.retry.is_exhausted(item.retry_count) {
            warn!(
              id = %item.id,
              channel = %channel,
              attempt = item.retry_count,
              error = %e,
              "Notification failed, holding channel until next pass"
            );
            report.retrying.push(item.id.clone());
            report.blocked = count - index - 1;
            stop_channel = true;
            ItemOutcome::Retrying
          } else {
            item.status = NotificationStatus::Failed;
            warn!(
              id = %item.id,
              channel = %channel,
              attempts = item.retry_count,
              error = %e,
              "Notification failed permanently"
            );
            report.failed.push(item.id.clone());
            ItemOutcome::Failed
          }
        }
      };
      if outcome != ItemOutcome::Completed && !discarded {
        self.save(&item)?;
      }

      let done = processed.fetch_add(1, Ordering::AcqRel) + 1;
      self.set_progress(done, total);
      on_progress(ItemProgress {
        queue: QueueKind::Notifications,
        id: item.id.clone(),
        outcome,
      });

      if stop_channel {
        break;
      }
    }

    Ok(report)
  }

  fn save(&self, item: &NotificationItem) -> Result<(), StorageError> {
    self.store.put_json(&keys::notification(&item.id), item)
  }

  fn next_seq(&self) -> Result<u64, StorageError> {
    Ok(
      self
        .all()?
        .iter()
        .map(|n| n.seq + 1)
        .max()
        .unwrap_or(0),
    )
  }

  fn set_progress(&self, done: usize, total: usize) {
    if let Ok(mut current) = self.current.lock() {
      *current = Some((done, total));
    }
  }
}
