//! User-adjustable sync behaviour, persisted alongside the queues.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{StorageError, SyncError};
use crate::queue::ActionType;
use crate::store::{keys, JsonStoreExt, LocalStore};

/// How often the orchestrator syncs on its own while online.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncInterval {
  #[default]
  Hourly,
  Daily,
  /// Only on reconnect, foreground or an explicit request
  Manual,
}

impl SyncInterval {
  pub fn period(&self) -> Option<std::time::Duration> {
    match self {
      SyncInterval::Hourly => Some(std::time::Duration::from_secs(60 * 60)),
      SyncInterval::Daily => Some(std::time::Duration::from_secs(24 * 60 * 60)),
      SyncInterval::Manual => None,
    }
  }
}

impl fmt::Display for SyncInterval {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      SyncInterval::Hourly => "hourly",
      SyncInterval::Daily => "daily",
      SyncInterval::Manual => "manual",
    })
  }
}

impl FromStr for SyncInterval {
  type Err = SyncError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "hourly" => Ok(SyncInterval::Hourly),
      "daily" => Ok(SyncInterval::Daily),
      "manual" => Ok(SyncInterval::Manual),
      other => Err(SyncError::Validation(format!("unknown sync interval '{}'", other))),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
  pub auto_sync: bool,
  /// Skip sessions while on a metered network
  pub sync_on_wifi_only: bool,
  pub sync_interval: SyncInterval,
  /// Cached entities older than this are pruned after a full sync
  pub retain_data_days: u32,
  /// Action types drained ahead of everything else
  pub channel_priority: BTreeSet<ActionType>,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      auto_sync: true,
      sync_on_wifi_only: false,
      sync_interval: SyncInterval::default(),
      retain_data_days: 30,
      channel_priority: BTreeSet::new(),
    }
  }
}

impl SyncSettings {
  pub fn validate(&self) -> Result<(), SyncError> {
    if self.retain_data_days == 0 {
      return Err(SyncError::Validation(
        "retain_data_days must be at least 1".into(),
      ));
    }
    Ok(())
  }

  pub fn retention(&self) -> Duration {
    Duration::days(i64::from(self.retain_data_days))
  }

  /// Period of automatic syncs, if any.
  pub fn auto_sync_period(&self) -> Option<std::time::Duration> {
    if self.auto_sync {
      self.sync_interval.period()
    } else {
      None
    }
  }

  /// Saved settings, or defaults when none were saved.
  pub fn load(store: &dyn LocalStore) -> Result<Self, StorageError> {
    Ok(store.get_json(keys::SETTINGS)?.unwrap_or_default())
  }

  pub fn save(&self, store: &dyn LocalStore) -> Result<(), StorageError> {
    store.put_json(keys::SETTINGS, self)
  }
}
