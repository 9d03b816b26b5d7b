//! Local mirror of server data with explicit freshness semantics.
//!
//! This module provides a typed cache over the local store that:
//! - Stamps every entry with its last update time and TTL
//! - Distinguishes missing data from stale data on read
//! - Serves stale entries when the network is unavailable
//! - Marks optimistic entries until the remote service confirms them

mod entry;
mod manager;

pub use entry::{
  default_ttl, CacheEntry, CacheLookup, CacheResult, CacheSource, EntitySummary, EntrySource,
};
pub use manager::CacheManager;
