//! In-memory gateway double with id deduplication and scripted failures.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::gateway::RemoteGateway;
use crate::error::{Result, SyncError};
use crate::queue::{
  ActionId, ActionReceipt, Channel, CommitmentPayload, DocumentPayload, EntityUpdate,
  PaymentPayload, ReminderPayload,
};

type Hook = Box<dyn Fn(&str) + Send + Sync>;

/// Gateway that applies each action id at most once.
#[derive(Default)]
pub struct MockGateway {
  /// Ids applied so far, in order
  applied: Mutex<Vec<String>>,
  /// Every action call, including replays and failures
  calls: Mutex<Vec<String>>,
  sent: Mutex<Vec<(Channel, String, String)>>,
  /// Errors returned, in order, for an action id or a notification message
  failures: Mutex<HashMap<String, VecDeque<SyncError>>>,
  updates: Mutex<HashMap<String, Vec<EntityUpdate>>>,
  latency: Option<Duration>,
  in_flight: AtomicUsize,
  /// Most action calls seen running at once
  max_in_flight: AtomicUsize,
  before_call: Option<Hook>,
}

impl MockGateway {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = Some(latency);
    self
  }

  /// Run `hook` with the action id before each action call.
  pub fn before_call(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
    self.before_call = Some(Box::new(hook));
    self
  }

  /// Fail the next call for `key` (an action id or a notification message).
  pub fn fail_next(&self, key: &str, error: SyncError) {
    self
      .failures
      .lock()
      .unwrap()
      .entry(key.to_string())
      .or_default()
      .push_back(error);
  }

  /// Report `updates` in the receipt for `id`.
  pub fn respond_with(&self, id: &str, updates: Vec<EntityUpdate>) {
    self.updates.lock().unwrap().insert(id.to_string(), updates);
  }

  pub fn applied(&self) -> Vec<String> {
    self.applied.lock().unwrap().clone()
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn max_in_flight(&self) -> usize {
    self.max_in_flight.load(Ordering::SeqCst)
  }

  pub fn sent(&self) -> Vec<(Channel, String, String)> {
    self.sent.lock().unwrap().clone()
  }

  fn scripted_failure(&self, key: &str) -> Option<SyncError> {
    self
      .failures
      .lock()
      .unwrap()
      .get_mut(key)
      .and_then(VecDeque::pop_front)
  }

  async fn apply(&self, id: &ActionId) -> Result<ActionReceipt> {
    let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(running, Ordering::SeqCst);
    let result = self.apply_once(id).await;
    self.in_flight.fetch_sub(1, Ordering::SeqCst);
    result
  }

  async fn apply_once(&self, id: &ActionId) -> Result<ActionReceipt> {
    if let Some(hook) = &self.before_call {
      hook(id.as_str());
    }
    self.calls.lock().unwrap().push(id.to_string());
    if let Some(latency) = self.latency {
      tokio::time::sleep(latency).await;
    }
    if let Some(error) = self.scripted_failure(id.as_str()) {
      return Err(error);
    }

    let mut applied = self.applied.lock().unwrap();
    let duplicate = applied.iter().any(|a| a == id.as_str());
    if !duplicate {
      applied.push(id.to_string());
    }
    let updates = self
      .updates
      .lock()
      .unwrap()
      .get(id.as_str())
      .cloned()
      .unwrap_or_default();
    Ok(ActionReceipt { duplicate, updates })
  }

  async fn send(&self, channel: Channel, recipient_id: &str, message: &str) -> Result<()> {
    if let Some(error) = self.scripted_failure(message) {
      return Err(error);
    }
    self
      .sent
      .lock()
      .unwrap()
      .push((channel, recipient_id.to_string(), message.to_string()));
    Ok(())
  }
}

#[async_trait]
impl RemoteGateway for MockGateway {
  async fn submit_payment(&self, id: &ActionId, _: &PaymentPayload) -> Result<ActionReceipt> {
    self.apply(id).await
  }

  async fn record_commitment(&self, id: &ActionId, _: &CommitmentPayload) -> Result<ActionReceipt> {
    self.apply(id).await
  }

  async fn schedule_reminder(&self, id: &ActionId, _: &ReminderPayload) -> Result<ActionReceipt> {
    self.apply(id).await
  }

  async fn upload_document(&self, id: &ActionId, _: &DocumentPayload) -> Result<ActionReceipt> {
    self.apply(id).await
  }

  async fn send_app(&self, recipient_id: &str, message: &str) -> Result<()> {
    self.send(Channel::App, recipient_id, message).await
  }

  async fn send_email(&self, recipient_id: &str, message: &str) -> Result<()> {
    self.send(Channel::Email, recipient_id, message).await
  }

  async fn send_sms(&self, recipient_id: &str, message: &str) -> Result<()> {
    self.send(Channel::Sms, recipient_id, message).await
  }

  async fn send_whatsapp(&self, recipient_id: &str, message: &str) -> Result<()> {
    self.send(Channel::Whatsapp, recipient_id, message).await
  }
}
