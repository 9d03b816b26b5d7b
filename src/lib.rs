//! Offline-first sync core for a savings-group client.
//!
//! Mutations made without a connection are queued durably and replayed in
//! order once the device is back online. Outbound notifications have their own
//! per-channel queue. A local cache mirrors server data with explicit
//! freshness so screens can render while offline.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod queue;
pub mod settings;
pub mod store;
pub mod sync;

pub use error::{Result, StorageError, SyncError};
pub use settings::{SyncInterval, SyncSettings};
pub use sync::SyncOrchestrator;
