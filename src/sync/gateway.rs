//! Remote service boundary.

use async_trait::async_trait;

use crate::error::Result;
use crate::queue::{
  ActionId, ActionKind, ActionReceipt, Channel, CommitmentPayload, DocumentPayload,
  NotificationItem, OfflineAction, PaymentPayload, ReminderPayload,
};

/// Remote savings-group service.
///
/// Every mutation carries the action id as its idempotency key. The service
/// applies an id at most once and answers a replay with `duplicate = true`.
/// Transport failures map to [`SyncError::Network`](crate::error::SyncError),
/// validation refusals to [`SyncError::Rejected`](crate::error::SyncError).
#[async_trait]
pub trait RemoteGateway: Send + Sync {
  async fn submit_payment(&self, id: &ActionId, payload: &PaymentPayload) -> Result<ActionReceipt>;

  async fn record_commitment(
    &self,
    id: &ActionId,
    payload: &CommitmentPayload,
  ) -> Result<ActionReceipt>;

  async fn schedule_reminder(
    &self,
    id: &ActionId,
    payload: &ReminderPayload,
  ) -> Result<ActionReceipt>;

  async fn upload_document(&self, id: &ActionId, payload: &DocumentPayload) -> Result<ActionReceipt>;

  async fn send_app(&self, recipient_id: &str, message: &str) -> Result<()>;

  async fn send_email(&self, recipient_id: &str, message: &str) -> Result<()>;

  async fn send_sms(&self, recipient_id: &str, message: &str) -> Result<()>;

  async fn send_whatsapp(&self, recipient_id: &str, message: &str) -> Result<()>;
}

/// Run an action against the gateway method for its type.
pub async fn execute(gateway: &dyn RemoteGateway, action: &OfflineAction) -> Result<ActionReceipt> {
  match &action.kind {
    ActionKind::Payment(p) => gateway.submit_payment(&action.id, p).await,
    ActionKind::Commitment(c) => gateway.record_commitment(&action.id, c).await,
    ActionKind::Reminder(r) => gateway.schedule_reminder(&action.id, r).await,
    ActionKind::Document(d) => gateway.upload_document(&action.id, d).await,
  }
}

/// Deliver a notification over its channel.
pub async fn deliver(gateway: &dyn RemoteGateway, item: &NotificationItem) -> Result<()> {
  let (to, message) = (item.recipient_id.as_str(), item.message.as_str());
  match item.channel {
    Channel::App => gateway.send_app(to, message).await,
    Channel::Email => gateway.send_email(to, message).await,
    Channel::Sms => gateway.send_sms(to, message).await,
    Channel::Whatsapp => gateway.send_whatsapp(to, message).await,
  }
}
