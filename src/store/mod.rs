//! Durable key-value storage shared by the cache and both queues.
//!
//! Every record is a single JSON value under a namespaced key:
//! - `actions/{id}` for queued mutations
//! - `notifications/{id}` for outbound notices
//! - `cache/{entity_type}:{id}` for cached entities
//! - `settings` and `meta/...` for single records
//!
//! A `put` is atomic and durable when it returns, so writers never need more
//! than one `put` per record to avoid partially visible updates.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::StorageError;

/// Backend for durable records.
pub trait LocalStore: Send + Sync {
  /// Insert or replace a value.
  fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

  /// Remove a value. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<(), StorageError>;

  /// All records whose key starts with `prefix`, ordered by key.
  fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>;

  /// Remove every record under `prefix` in one step. Returns how many went away.
  fn remove_prefix(&self, prefix: &str) -> Result<usize, StorageError>;

  fn clear_all(&self) -> Result<(), StorageError>;
}

/// Typed JSON access on top of any [`LocalStore`].
pub trait JsonStoreExt {
  fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError>;

  fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError>;

  fn scan_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, T)>, StorageError>;
}

impl<S: LocalStore + ?Sized> JsonStoreExt for S {
  fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
    let data = serde_json::to_vec(value).map_err(|source| StorageError::Serialization {
      key: key.to_string(),
      source,
    })?;
    self.put(key, &data)
  }

  fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
    match self.get(key)? {
      Some(data) => serde_json::from_slice(&data)
        .map(Some)
        .map_err(|source| StorageError::Serialization {
          key: key.to_string(),
          source,
        }),
      None => Ok(None),
    }
  }

  fn scan_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, T)>, StorageError> {
    self
      .scan_prefix(prefix)?
      .into_iter()
      .map(|(key, data)| match serde_json::from_slice(&data) {
        Ok(value) => Ok((key, value)),
        Err(source) => Err(StorageError::Serialization { key, source }),
      })
      .collect()
  }
}

/// Key layout for persisted state.
pub mod keys {
  pub const ACTIONS: &str = "actions/";
  pub const NOTIFICATIONS: &str = "notifications/";
  pub const CACHE: &str = "cache/";
  pub const SETTINGS: &str = "settings";
  pub const LAST_FULL_SYNC: &str = "meta/last_full_sync";

  pub fn action(id: &str) -> String {
    format!("{}{}", ACTIONS, id)
  }

  pub fn notification(id: &str) -> String {
    format!("{}{}", NOTIFICATIONS, id)
  }

  /// Cache entries are addressed as `entity_type:id` inside the cache namespace.
  pub fn cache(entity_type: &str, id: &str) -> String {
    format!("{}{}:{}", CACHE, entity_type, id)
  }
}
