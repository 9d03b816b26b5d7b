//! In-process store for tests and hosts that do not need durability.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::LocalStore;
use crate::error::StorageError;

/// Map-backed store. Clones share the same contents, which lets tests
/// simulate a reload by building fresh queues over a clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  records: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.records.lock().map(|r| r.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl LocalStore for MemoryStore {
  fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
    let mut records = self.records.lock().map_err(|_| StorageError::Poisoned)?;
    records.insert(key.to_string(), value.to_vec());
    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
    let records = self.records.lock().map_err(|_| StorageError::Poisoned)?;
    Ok(records.get(key).cloned())
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    let mut records = self.records.lock().map_err(|_| StorageError::Poisoned)?;
    records.remove(key);
    Ok(())
  }

  fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
    let records = self.records.lock().map_err(|_| StorageError::Poisoned)?;
    Ok(
      records
        .range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
    )
  }

  fn remove_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
    let mut records = self.records.lock().map_err(|_| StorageError::Poisoned)?;
    let before = records.len();
    records.retain(|k, _| !k.starts_with(prefix));
    Ok(before - records.len())
  }

  fn clear_all(&self) -> Result<(), StorageError> {
    let mut records = self.records.lock().map_err(|_| StorageError::Poisoned)?;
    records.clear();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_scan_prefix_is_ordered_and_bounded() {
    let store = MemoryStore::new();
    store.put("cache/b", b"2").unwrap();
    store.put("actions/x", b"0").unwrap();
    store.put("cache/a", b"1").unwrap();
    store.put("cachex", b"3").unwrap();

    let keys: Vec<String> = store
      .scan_prefix("cache/")
      .unwrap()
      .into_iter()
      .map(|(k, _)| k)
      .collect();
    assert_eq!(keys, vec!["cache/a", "cache/b"]);
  }

  #[test]
  fn test_remove_prefix_leaves_other_namespaces() {
    let store = MemoryStore::new();
    store.put("cache/a", b"1").unwrap();
    store.put("cache/b", b"2").unwrap();
    store.put("actions/x", b"0").unwrap();

    assert_eq!(store.remove_prefix("cache/").unwrap(), 2);
    assert_eq!(store.len(), 1);
    assert!(store.get("actions/x").unwrap().is_some());
  }

  #[test]
  fn test_clones_share_contents() {
    let store = MemoryStore::new();
    let reloaded = store.clone();
    store.put("k", b"v").unwrap();
    assert_eq!(reloaded.get("k").unwrap(), Some(b"v".to_vec()));

    reloaded.clear_all().unwrap();
    assert!(store.is_empty());
  }
}
