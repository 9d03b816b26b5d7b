//! Offline mutation records and their typed payloads.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::notification::NotificationDraft;
use crate::error::SyncError;

/// Client-generated idempotency key. Stable across retries and restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
  pub fn generate() -> Self {
    Self(uuid::Uuid::new_v4().to_string())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for ActionId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

impl From<String> for ActionId {
  fn from(s: String) -> Self {
    Self(s)
  }
}

impl fmt::Display for ActionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Discriminant of [`ActionKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
  Payment,
  Commitment,
  Reminder,
  Document,
}

impl ActionType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ActionType::Payment => "payment",
      ActionType::Commitment => "commitment",
      ActionType::Reminder => "reminder",
      ActionType::Document => "document",
    }
  }

  /// Money movement first, reminders last.
  pub fn default_priority(&self) -> Priority {
    match self {
      ActionType::Payment => Priority::High,
      ActionType::Commitment | ActionType::Document => Priority::Normal,
      ActionType::Reminder => Priority::Low,
    }
  }
}

impl fmt::Display for ActionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ActionType {
  type Err = SyncError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "payment" => Ok(ActionType::Payment),
      "commitment" => Ok(ActionType::Commitment),
      "reminder" => Ok(ActionType::Reminder),
      "document" => Ok(ActionType::Document),
      other => Err(SyncError::Validation(format!("unknown action type '{}'", other))),
    }
  }
}

/// Execution priority; higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  Low,
  Normal,
  High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
  Pending,
  InFlight,
  Failed,
  Completed,
}

/// A contribution paid into a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPayload {
  pub group_id: String,
  pub member_id: String,
  /// Minor currency units
  pub amount: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub currency: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContributionCycle {
  Weekly,
  Biweekly,
  Monthly,
}

/// A member's pledge to contribute on a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentPayload {
  pub group_id: String,
  pub member_id: String,
  pub amount: u64,
  pub cycle: ContributionCycle,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub starts_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPayload {
  pub group_id: String,
  pub member_id: String,
  pub note: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub due_at: Option<DateTime<Utc>>,
}

/// Metadata for a document attached to a group (receipts, constitutions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPayload {
  pub group_id: String,
  pub title: String,
  pub file_name: String,
  pub content_type: String,
  pub size_bytes: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub local_path: Option<String>,
}

/// Typed mutation payload, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionKind {
  Payment(PaymentPayload),
  Commitment(CommitmentPayload),
  Reminder(ReminderPayload),
  Document(DocumentPayload),
}

/// Largest document the client will queue for upload.
const MAX_DOCUMENT_BYTES: u64 = 25 * 1024 * 1024;

impl ActionKind {
  pub fn action_type(&self) -> ActionType {
    match self {
      ActionKind::Payment(_) => ActionType::Payment,
      ActionKind::Commitment(_) => ActionType::Commitment,
      ActionKind::Reminder(_) => ActionType::Reminder,
      ActionKind::Document(_) => ActionType::Document,
    }
  }

  /// Reject malformed payloads before they reach the durable queue.
  pub fn validate(&self) -> Result<(), SyncError> {
    match self {
      ActionKind::Payment(p) => {
        require("group_id", &p.group_id)?;
        require("member_id", &p.member_id)?;
        if p.amount == 0 {
          return Err(SyncError::Validation("payment amount must be positive".into()));
        }
      }
      ActionKind::Commitment(c) => {
        require("group_id", &c.group_id)?;
        require("member_id", &c.member_id)?;
        if c.amount == 0 {
          return Err(SyncError::Validation(
            "commitment amount must be positive".into(),
          ));
        }
      }
      ActionKind::Reminder(r) => {
        require("group_id", &r.group_id)?;
        require("member_id", &r.member_id)?;
        require("note", &r.note)?;
      }
      ActionKind::Document(d) => {
        require("group_id", &d.group_id)?;
        require("title", &d.title)?;
        require("file_name", &d.file_name)?;
        require("content_type", &d.content_type)?;
        if d.size_bytes > MAX_DOCUMENT_BYTES {
          return Err(SyncError::Validation(format!(
            "document is {} bytes, limit is {}",
            d.size_bytes, MAX_DOCUMENT_BYTES
          )));
        }
      }
    }
    Ok(())
  }

  /// The payload as the cache should show it until the server confirms.
  pub fn to_json(&self) -> Result<serde_json::Value, SyncError> {
    serde_json::to_value(self).map_err(|e| SyncError::Validation(e.to_string()))
  }
}

fn require(field: &str, value: &str) -> Result<(), SyncError> {
  if value.trim().is_empty() {
    return Err(SyncError::Validation(format!("{} must not be empty", field)));
  }
  Ok(())
}

/// A mutation waiting to be replayed against the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineAction {
  pub id: ActionId,
  #[serde(flatten)]
  pub kind: ActionKind,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub priority: Priority,
  pub status: ActionStatus,
  pub retry_count: u32,
  /// Enqueue order; breaks ties between equal `created_at`
  pub seq: u64,
  pub last_error: Option<String>,
  /// Notifications to queue once the action succeeds
  #[serde(default)]
  pub on_success: Vec<NotificationDraft>,
}

impl OfflineAction {
  pub fn action_type(&self) -> ActionType {
    self.kind.action_type()
  }

  /// Cache slot holding this action's optimistic and confirmed state.
  pub fn cache_slot(&self) -> (&'static str, &str) {
    (self.action_type().as_str(), self.id.as_str())
  }
}

/// Request to queue a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAction {
  /// Idempotency key; generated when absent
  #[serde(default)]
  pub id: Option<ActionId>,
  #[serde(flatten)]
  pub kind: ActionKind,
  /// Defaults to the action type's priority
  #[serde(default)]
  pub priority: Option<Priority>,
  #[serde(default)]
  pub on_success: Vec<NotificationDraft>,
}

impl NewAction {
  pub fn new(kind: ActionKind) -> Self {
    Self {
      id: None,
      kind,
      priority: None,
      on_success: Vec::new(),
    }
  }

  pub fn with_id(mut self, id: impl Into<ActionId>) -> Self {
    self.id = Some(id.into());
    self
  }

  pub fn with_priority(mut self, priority: Priority) -> Self {
    self.priority = Some(priority);
    self
  }

  pub fn notify(mut self, draft: NotificationDraft) -> Self {
    self.on_success.push(draft);
    self
  }

  pub fn validate(&self) -> Result<(), SyncError> {
    if let Some(id) = &self.id {
      require("id", id.as_str())?;
    }
    self.kind.validate()?;
    self.on_success.iter().try_for_each(NotificationDraft::validate)
  }
}

/// A cached entity the remote service reported as changed by an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
  pub entity_type: String,
  pub entity_id: String,
  pub payload: serde_json::Value,
}

/// Authoritative result of executing an action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionReceipt {
  /// True when the service recognised the idempotency key and did nothing new
  #[serde(default)]
  pub duplicate: bool,
  #[serde(default)]
  pub updates: Vec<EntityUpdate>,
}
