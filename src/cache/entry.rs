//! Cached entity records and freshness types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default time-to-live for cached entities.
pub fn default_ttl() -> Duration {
  Duration::hours(24)
}

/// Where a cached payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
  /// Authoritative data returned by the remote service
  Remote,
  /// Local change applied ahead of remote confirmation
  Optimistic,
}

/// A locally cached mirror of one server entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  /// `entity_type:id`
  pub key: String,
  pub entity_type: String,
  pub entity_id: String,
  pub payload: serde_json::Value,
  pub last_updated_at: DateTime<Utc>,
  #[serde(with = "ttl_seconds")]
  pub ttl: Duration,
  pub source: EntrySource,
}

impl CacheEntry {
  /// Stale once more than `ttl` has passed since the last update.
  pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
    now - self.last_updated_at > self.ttl
  }

  pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
    !self.is_stale_at(now)
  }
}

/// Outcome of a cache read that keeps "no data" apart from "old data".
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
  Missing,
  Fresh(CacheEntry),
  /// Still usable; callers render it with a staleness warning.
  Stale(CacheEntry),
}

impl CacheLookup {
  pub fn entry(&self) -> Option<&CacheEntry> {
    match self {
      CacheLookup::Missing => None,
      CacheLookup::Fresh(e) | CacheLookup::Stale(e) => Some(e),
    }
  }

  pub fn into_entry(self) -> Option<CacheEntry> {
    match self {
      CacheLookup::Missing => None,
      CacheLookup::Fresh(e) | CacheLookup::Stale(e) => Some(e),
    }
  }

  pub fn is_stale(&self) -> bool {
    matches!(self, CacheLookup::Stale(_))
  }
}

/// Result from a cache-first fetch, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult {
  pub entry: CacheEntry,
  pub source: CacheSource,
}

/// Indicates where fetched data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Network unavailable, serving stale cached data
  Offline,
}

/// Per entity type rollup for status screens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySummary {
  pub count: usize,
  pub last_updated_at: Option<DateTime<Utc>>,
  /// True when no entry of this type is stale.
  pub is_fresh: bool,
}

mod ttl_seconds {
  use chrono::Duration;
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(ttl.num_seconds())
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = i64::deserialize(deserializer)?;
    Ok(Duration::seconds(secs))
  }
}
