//! Optional durability layer.
//!
//! The gateway runs correctly without a store (cold cache, empty spend
//! windows). When one is configured it receives usage records from the
//! ledger flusher and cache snapshots at shutdown, and is read once at
//! startup for a warm start.

mod file;

pub use file::FileStore;

use crate::cache::PersistedEntry;
use crate::ledger::UsageRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors returned by a persistent store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(String),

    #[error("store serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Durable storage for usage records and cache entries.
#[async_trait]
pub trait PersistentStore: Send + Sync + 'static {
    /// Append usage records. Records are never rewritten.
    async fn append_usage(&self, records: &[UsageRecord]) -> Result<(), StoreError>;

    /// Usage records with a timestamp at or after `since`.
    async fn load_usage(&self, since: DateTime<Utc>) -> Result<Vec<UsageRecord>, StoreError>;

    /// Replace the stored cache snapshot.
    async fn save_cache_entries(&self, entries: &[PersistedEntry]) -> Result<(), StoreError>;

    async fn load_cache_entries(&self) -> Result<Vec<PersistedEntry>, StoreError>;
}
