//! Typed access to cached entities with per-entry freshness.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::entry::{
  default_ttl, CacheEntry, CacheLookup, CacheResult, CacheSource, EntitySummary, EntrySource,
};
use crate::clock::Clock;
use crate::error::StorageError;
use crate::store::{keys, JsonStoreExt, LocalStore};

/// Cache manager over the shared local store.
///
/// Only touches the `cache/` namespace. Queued actions and notifications have
/// their own lifecycles and are never evicted from here.
#[derive(Clone)]
pub struct CacheManager {
  store: Arc<dyn LocalStore>,
  clock: Arc<dyn Clock>,
  /// TTL applied when a write does not name one
  default_ttl: Duration,
}

impl CacheManager {
  pub fn new(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      clock,
      default_ttl: default_ttl(),
    }
  }

  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  pub fn read(&self, entity_type: &str, id: &str) -> Result<Option<CacheEntry>, StorageError> {
    self.store.get_json(&keys::cache(entity_type, id))
  }

  /// Read and classify an entry against the current time.
  pub fn lookup(&self, entity_type: &str, id: &str) -> Result<CacheLookup, StorageError> {
    Ok(match self.read(entity_type, id)? {
      None => CacheLookup::Missing,
      Some(entry) if self.is_fresh(&entry) => CacheLookup::Fresh(entry),
      Some(entry) => CacheLookup::Stale(entry),
    })
  }

  /// Store authoritative data, stamped with the current time.
  pub fn write(
    &self,
    entity_type: &str,
    id: &str,
    payload: serde_json::Value,
    ttl: Option<Duration>,
  ) -> Result<CacheEntry, StorageError> {
    let now = self.clock.now();
    self.write_at(entity_type, id, payload, ttl, now, EntrySource::Remote)
  }

  /// Store a local change ahead of remote confirmation.
  pub fn write_optimistic(
    &self,
    entity_type: &str,
    id: &str,
    payload: serde_json::Value,
  ) -> Result<CacheEntry, StorageError> {
    let now = self.clock.now();
    self.write_at(entity_type, id, payload, None, now, EntrySource::Optimistic)
  }

  /// Store an entry with an explicit timestamp.
  ///
  /// Reconciliation uses this so every entry touched by one sync carries the
  /// same completion time.
  pub fn write_at(
    &self,
    entity_type: &str,
    id: &str,
    payload: serde_json::Value,
    ttl: Option<Duration>,
    at: DateTime<Utc>,
    source: EntrySource,
  ) -> Result<CacheEntry, StorageError> {
    let entry = CacheEntry {
      key: format!("{}:{}", entity_type, id),
      entity_type: entity_type.to_string(),
      entity_id: id.to_string(),
      payload,
      last_updated_at: at,
      ttl: ttl.unwrap_or(self.default_ttl),
      source,
    };
    self
      .store
      .put_json(&keys::cache(entity_type, id), &entry)?;
    debug!(key = %entry.key, source = ?source, "Cache entry written");
    Ok(entry)
  }

  pub fn is_fresh(&self, entry: &CacheEntry) -> bool {
    entry.is_fresh_at(self.clock.now())
  }

  pub fn evict(&self, entity_type: &str, id: &str) -> Result<(), StorageError> {
    self.store.remove(&keys::cache(entity_type, id))
  }

  /// Remove every cached entity. Returns how many entries were dropped.
  pub fn evict_all(&self) -> Result<usize, StorageError> {
    let removed = self.store.remove_prefix(keys::CACHE)?;
    info!(removed, "Cache cleared");
    Ok(removed)
  }

  /// Drop entries not updated within `max_age`.
  pub fn prune_older_than(&self, max_age: Duration) -> Result<usize, StorageError> {
    let cutoff = self.clock.now() - max_age;
    let mut removed = 0;
    for (key, entry) in self.entries()? {
      if entry.last_updated_at < cutoff {
        self.store.remove(&key)?;
        removed += 1;
      }
    }
    if removed > 0 {
      info!(removed, max_age_days = max_age.num_days(), "Pruned old cache entries");
    }
    Ok(removed)
  }

  /// Count, newest update and freshness per entity type.
  pub fn summarize(&self) -> Result<BTreeMap<String, EntitySummary>, StorageError> {
    let now = self.clock.now();
    let mut summary: BTreeMap<String, EntitySummary> = BTreeMap::new();

    for (_, entry) in self.entries()? {
      let slot = summary
        .entry(entry.entity_type.clone())
        .or_insert(EntitySummary {
          count: 0,
          last_updated_at: None,
          is_fresh: true,
        });
      slot.count += 1;
      slot.last_updated_at = slot.last_updated_at.max(Some(entry.last_updated_at));
      slot.is_fresh &= entry.is_fresh_at(now);
    }

    Ok(summary)
  }

  /// Fetch a single entity with a cache-first strategy.
  ///
  /// 1. Fresh cache hit - return immediately
  /// 2. Stale or missing - call the fetcher and store its result
  /// 3. Fetcher failed with a stale entry available - serve it (offline mode)
  /// 4. Fetcher failed with nothing cached - propagate the error
  pub async fn fetch_through<F, Fut, E>(
    &self,
    entity_type: &str,
    id: &str,
    ttl: Option<Duration>,
    fetcher: F,
  ) -> Result<CacheResult, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<serde_json::Value, E>>,
    E: From<StorageError> + std::fmt::Display,
  {
    let cached = match self.lookup(entity_type, id)? {
      CacheLookup::Fresh(entry) => {
        return Ok(CacheResult {
          entry,
          source: CacheSource::CacheFresh,
        });
      }
      CacheLookup::Stale(entry) => Some(entry),
      CacheLookup::Missing => None,
    };

    match fetcher().await {
      Ok(payload) => {
        let entry = self.write(entity_type, id, payload, ttl)?;
        Ok(CacheResult {
          entry,
          source: CacheSource::Network,
        })
      }
      Err(e) => match cached {
        Some(entry) => {
          warn!(key = %entry.key, error = %e, "Fetch failed, serving stale cache");
          Ok(CacheResult {
            entry,
            source: CacheSource::Offline,
          })
        }
        None => Err(e),
      },
    }
  }

  fn entries(&self) -> Result<Vec<(String, CacheEntry)>, StorageError> {
    self.store.scan_json(keys::CACHE)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::error::SyncError;
  use crate::store::MemoryStore;
  use chrono::TimeZone;
  use serde_json::json;

  fn setup() -> (CacheManager, ManualClock, MemoryStore) {
    let store = MemoryStore::new();
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap());
    let cache = CacheManager::new(Arc::new(store.clone()), Arc::new(clock.clone()));
    (cache, clock, store)
  }

  #[test]
  fn test_freshness_follows_ttl() {
    let (cache, clock, _) = setup();
    cache
      .write("group", "g1", json!({"members": 12}), None)
      .unwrap();

    clock.advance(Duration::hours(23));
    assert!(matches!(
      cache.lookup("group", "g1").unwrap(),
      CacheLookup::Fresh(_)
    ));

    clock.advance(Duration::hours(2));
    let lookup = cache.lookup("group", "g1").unwrap();
    assert!(lookup.is_stale());
    assert_eq!(lookup.entry().unwrap().payload, json!({"members": 12}));
  }

  #[test]
  fn test_missing_is_distinct_from_stale() {
    let (cache, _, _) = setup();
    assert_eq!(cache.lookup("group", "nope").unwrap(), CacheLookup::Missing);
    assert!(cache.read("group", "nope").unwrap().is_none());
  }

  #[test]
  fn test_evict_all_leaves_queues_alone() {
    let (cache, _, store) = setup();
    cache.write("group", "g1", json!({}), None).unwrap();
    cache.write("member", "m1", json!({}), None).unwrap();
    store.put("actions/a1", b"{}").unwrap();
    store.put("notifications/n1", b"{}").unwrap();

    assert_eq!(cache.evict_all().unwrap(), 2);
    assert!(cache.summarize().unwrap().is_empty());
    assert!(store.get("actions/a1").unwrap().is_some());
    assert!(store.get("notifications/n1").unwrap().is_some());
  }

  #[test]
  fn test_summarize_per_entity_type() {
    let (cache, clock, _) = setup();
    let t0 = clock.now();
    cache
      .write("member", "m1", json!({}), Some(Duration::hours(1)))
      .unwrap();
    clock.advance(Duration::hours(2));
    cache.write("member", "m2", json!({}), None).unwrap();
    cache.write("group", "g1", json!({}), None).unwrap();

    let summary = cache.summarize().unwrap();
    let members = &summary["member"];
    assert_eq!(members.count, 2);
    assert_eq!(members.last_updated_at, Some(t0 + Duration::hours(2)));
    // m1 outlived its one hour TTL
    assert!(!members.is_fresh);
    assert!(summary["group"].is_fresh);
  }

  #[test]
  fn test_prune_older_than() {
    let (cache, clock, _) = setup();
    cache.write("group", "old", json!({}), None).unwrap();
    clock.advance(Duration::days(40));
    cache.write("group", "new", json!({}), None).unwrap();

    assert_eq!(cache.prune_older_than(Duration::days(30)).unwrap(), 1);
    assert!(cache.read("group", "old").unwrap().is_none());
    assert!(cache.read("group", "new").unwrap().is_some());
  }

  #[test]
  fn test_optimistic_write_is_marked() {
    let (cache, _, _) = setup();
    let entry = cache
      .write_optimistic("payment", "a1", json!({"amount": 50}))
      .unwrap();
    assert_eq!(entry.source, EntrySource::Optimistic);
    assert_eq!(entry.key, "payment:a1");
    assert_eq!(entry.ttl, Duration::hours(24));
  }

  #[tokio::test]
  async fn test_fetch_through_prefers_fresh_cache() {
    let (cache, _, _) = setup();
    cache.write("group", "g1", json!({"v": 1}), None).unwrap();

    let result = cache
      .fetch_through("group", "g1", None, || async {
        Err::<serde_json::Value, SyncError>(SyncError::Network("should not be called".into()))
      })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(result.entry.payload, json!({"v": 1}));
  }

  #[tokio::test]
  async fn test_fetch_through_refreshes_stale_entry() {
    let (cache, clock, _) = setup();
    cache.write("group", "g1", json!({"v": 1}), None).unwrap();
    clock.advance(Duration::hours(30));

    let result = cache
      .fetch_through("group", "g1", None, || async {
        Ok::<_, SyncError>(json!({"v": 2}))
      })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.entry.last_updated_at, clock.now());
    assert_eq!(cache.read("group", "g1").unwrap().unwrap().payload, json!({"v": 2}));
  }

  #[tokio::test]
  async fn test_fetch_through_serves_stale_when_offline() {
    let (cache, clock, _) = setup();
    cache.write("group", "g1", json!({"v": 1}), None).unwrap();
    clock.advance(Duration::hours(30));

    let result = cache
      .fetch_through("group", "g1", None, || async {
        Err::<serde_json::Value, _>(SyncError::Network("offline".into()))
      })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.entry.payload, json!({"v": 1}));
  }

  #[tokio::test]
  async fn test_fetch_through_propagates_when_nothing_cached() {
    let (cache, _, _) = setup();
    let err = cache
      .fetch_through("group", "g1", None, || async {
        Err::<serde_json::Value, _>(SyncError::Timeout(std::time::Duration::from_secs(5)))
      })
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::Timeout(_)));
  }
}
