//! Outbound notification records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// Delivery channel for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
  App,
  Email,
  Sms,
  Whatsapp,
}

impl Channel {
  pub const ALL: [Channel; 4] = [Channel::App, Channel::Email, Channel::Sms, Channel::Whatsapp];

  pub fn as_str(&self) -> &'static str {
    match self {
      Channel::App => "app",
      Channel::Email => "email",
      Channel::Sms => "sms",
      Channel::Whatsapp => "whatsapp",
    }
  }
}

impl fmt::Display for Channel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Channel {
  type Err = SyncError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "app" => Ok(Channel::App),
      "email" => Ok(Channel::Email),
      "sms" => Ok(Channel::Sms),
      "whatsapp" => Ok(Channel::Whatsapp),
      other => Err(SyncError::Validation(format!("unknown channel '{}'", other))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
  Queued,
  Sent,
  Failed,
}

/// A notification the caller wants delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationDraft {
  pub channel: Channel,
  pub recipient_id: String,
  pub message: String,
}

impl NotificationDraft {
  pub fn new(channel: Channel, recipient_id: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      channel,
      recipient_id: recipient_id.into(),
      message: message.into(),
    }
  }

  pub fn validate(&self) -> Result<(), SyncError> {
    if self.recipient_id.trim().is_empty() {
      return Err(SyncError::Validation(format!(
        "{} notification has no recipient",
        self.channel
      )));
    }
    if self.message.trim().is_empty() {
      return Err(SyncError::Validation(format!(
        "{} notification to {} has an empty message",
        self.channel, self.recipient_id
      )));
    }
    Ok(())
  }
}

/// A queued notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationItem {
  pub id: String,
  pub channel: Channel,
  pub recipient_id: String,
  pub message: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub retry_count: u32,
  pub status: NotificationStatus,
  /// Enqueue order; breaks ties between equal `created_at`
  pub seq: u64,
  pub last_error: Option<String>,
}
