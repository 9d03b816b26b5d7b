//! SQLite-backed local store.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use super::LocalStore;
use crate::error::StorageError;

/// Durable store in a single SQLite table.
pub struct SqliteStore {
  conn: Mutex<Connection>,
  path: Option<PathBuf>,
}

/// Schema for the key-value table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY NOT NULL,
    value BLOB NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteStore {
  /// Open or create the store at the default location.
  pub fn open_default() -> Result<Self, StorageError> {
    let path = Self::default_path()?;
    Self::open(&path)
  }

  /// Open or create the store at `path`, creating parent directories.
  pub fn open(path: &Path) -> Result<Self, StorageError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StorageError::Backend(format!("Failed to create store directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      StorageError::Backend(format!(
        "Failed to open store at {}: {}",
        path.display(),
        e
      ))
    })?;

    info!(path = %path.display(), "Opened local store");
    let store = Self {
      conn: Mutex::new(conn),
      path: Some(path.to_path_buf()),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self, StorageError> {
    let conn = Connection::open_in_memory()?;
    let store = Self {
      conn: Mutex::new(conn),
      path: None,
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, StorageError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StorageError::Backend("Could not determine data directory".into()))?;

    Ok(data_dir.join("savings-sync").join("store.db"))
  }

  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  fn run_migrations(&self) -> Result<(), StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;

    // WAL keeps readers unblocked; FULL sync makes every commit durable on return.
    let mode: String =
      conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    debug!(journal_mode = %mode, "Configured store journal");

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| StorageError::Backend(format!("Failed to run store migrations: {}", e)))?;
    Ok(())
  }
}

impl LocalStore for SqliteStore {
  fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    conn
      .execute(
        "INSERT OR REPLACE INTO kv (key, value, written_at) VALUES (?1, ?2, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| StorageError::Backend(format!("Failed to write '{}': {}", key, e)))?;
    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    let value = conn
      .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| StorageError::Backend(format!("Failed to read '{}': {}", key, e)))?;
    Ok(value)
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    conn
      .execute("DELETE FROM kv WHERE key = ?1", params![key])
      .map_err(|e| StorageError::Backend(format!("Failed to remove '{}': {}", key, e)))?;
    Ok(())
  }

  fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    let mut stmt = conn
      .prepare(
        "SELECT key, value FROM kv
         WHERE substr(key, 1, length(?1)) = ?1
         ORDER BY key",
      )
      .map_err(|e| StorageError::Backend(format!("Failed to prepare scan: {}", e)))?;

    let rows = stmt
      .query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| StorageError::Backend(format!("Failed to scan '{}': {}", prefix, e)))?;

    // A row that fails to decode is an I/O problem, not a missing record.
    rows
      .collect::<Result<Vec<(String, Vec<u8>)>, _>>()
      .map_err(StorageError::from)
  }

  fn remove_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    let removed = conn
      .execute(
        "DELETE FROM kv WHERE substr(key, 1, length(?1)) = ?1",
        params![prefix],
      )
      .map_err(|e| StorageError::Backend(format!("Failed to remove '{}': {}", prefix, e)))?;
    Ok(removed)
  }

  fn clear_all(&self) -> Result<(), StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    conn
      .execute("DELETE FROM kv", [])
      .map_err(|e| StorageError::Backend(format!("Failed to clear store: {}", e)))?;
    Ok(())
  }
}
