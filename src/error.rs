//! Error taxonomy for the sync subsystem.

use std::time::Duration;
use thiserror::Error;

/// Failure of the persistent local store.
///
/// Always fatal to the call that triggered it. The store never retries.
#[derive(Error, Debug)]
pub enum StorageError {
  #[error("storage backend error: {0}")]
  Backend(String),
  #[error("failed to encode or decode record '{key}': {source}")]
  Serialization {
    key: String,
    #[source]
    source: serde_json::Error,
  },
  #[error("storage lock poisoned")]
  Poisoned,
}

impl From<rusqlite::Error> for StorageError {
  fn from(e: rusqlite::Error) -> Self {
    StorageError::Backend(e.to_string())
  }
}

/// Errors surfaced by queues, the cache manager and the orchestrator.
#[derive(Error, Debug)]
pub enum SyncError {
  #[error(transparent)]
  Storage(#[from] StorageError),

  /// Transient transport failure reported by the gateway.
  #[error("network error: {0}")]
  Network(String),

  /// A remote call exceeded its time bound.
  #[error("remote call timed out after {0:?}")]
  Timeout(Duration),

  /// The gateway validated the request and refused it (e.g. insufficient balance).
  #[error("rejected by remote service: {0}")]
  Rejected(String),

  /// Retry bound exhausted. Terminal until the user retries or discards.
  #[error("'{id}' failed permanently after {attempts} attempts: {reason}")]
  PermanentFailure {
    id: String,
    attempts: u32,
    reason: String,
  },

  /// Malformed input, refused before it reaches the durable queue.
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("no queued item with id '{0}'")]
  NotFound(String),
}

impl SyncError {
  /// Whether the failure should feed retry accounting rather than end the item.
  pub fn is_transient(&self) -> bool {
    matches!(self, SyncError::Network(_) | SyncError::Timeout(_))
  }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transient_classification() {
    assert!(SyncError::Network("reset".into()).is_transient());
    assert!(SyncError::Timeout(Duration::from_secs(1)).is_transient());
    assert!(!SyncError::Rejected("insufficient balance".into()).is_transient());
    assert!(!SyncError::Validation("empty".into()).is_transient());
    assert!(!SyncError::Storage(StorageError::Poisoned).is_transient());
  }

  #[test]
  fn test_permanent_failure_message_names_item() {
    let err = SyncError::PermanentFailure {
      id: "a1".into(),
      attempts: 5,
      reason: "network error: down".into(),
    };
    assert!(err.to_string().contains("'a1'"));
    assert!(err.to_string().contains("5 attempts"));
  }
}
