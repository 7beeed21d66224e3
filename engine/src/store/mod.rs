//! Storage contract consumed by the engine.
//!
//! A [`StorageBackend`] is the one physical storage handle of a database; it
//! opens a [`RecordStore`] per logical table. Every store call is its own
//! transaction; there are no multi-record transactions.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::{MemoryBackend, MemoryStore};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteBackend, SqliteStore};

use crate::id::ServerId;
use crate::{error::Result, Record};
use async_trait::async_trait;
use std::sync::Arc;

/// Per-table record storage.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get a record by local id, tombstones included.
    async fn get(&self, local_id: &str) -> Result<Option<Record>>;

    /// Insert or replace a record by local id.
    async fn put(&self, record: &Record) -> Result<()>;

    /// Set the tombstone flag. Returns false when no such record exists.
    async fn soft_delete(&self, local_id: &str) -> Result<bool>;

    /// Physically remove a record. Returns false when no such record exists.
    async fn hard_delete(&self, local_id: &str) -> Result<bool>;

    /// All records without a tombstone.
    async fn scan_not_deleted(&self) -> Result<Vec<Record>>;

    /// All tombstoned records.
    async fn scan_deleted(&self) -> Result<Vec<Record>>;

    /// Whether the table holds no rows at all (tombstones count).
    async fn is_empty(&self) -> Result<bool>;

    /// Remove every row.
    async fn clear(&self) -> Result<()>;

    /// Find a record (tombstones included) by its server identity.
    async fn find_by_server_id(&self, server_id: &ServerId) -> Result<Option<Record>> {
        let mut rows = self.scan_not_deleted().await?;
        rows.extend(self.scan_deleted().await?);
        Ok(rows
            .into_iter()
            .find(|r| r.server_id.as_ref() == Some(server_id)))
    }

    /// Whether this store can actually persist records.
    fn is_supported(&self) -> bool {
        true
    }
}

/// One physical storage connection shared by many logical tables.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Open (creating if needed) the store for a table.
    async fn open(&self, table: &str) -> Result<Arc<dyn RecordStore>>;

    /// Move the rows stored under `from` to `to` and return the store for
    /// `to`. If `to` already exists it is used as is and `from` is dropped.
    async fn rename(&self, from: &str, to: &str) -> Result<Arc<dyn RecordStore>>;
}
