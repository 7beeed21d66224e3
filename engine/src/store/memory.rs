//! In-memory storage backend.

use super::{RecordStore, StorageBackend};
use crate::{error::Result, Error, LocalId, Record};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Records of one table, held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<LocalId, Record>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a storage error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of rows, tombstones included.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("store is not writable".into()));
        }
        Ok(())
    }

    fn scan(&self, deleted: bool) -> Vec<Record> {
        let mut rows: Vec<Record> = self
            .records
            .lock()
            .values()
            .filter(|r| r.deleted == deleted)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.local_id.cmp(&b.local_id))
        });
        rows
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, local_id: &str) -> Result<Option<Record>> {
        Ok(self.records.lock().get(local_id).cloned())
    }

    async fn put(&self, record: &Record) -> Result<()> {
        self.check_writable()?;
        self.records
            .lock()
            .insert(record.local_id.clone(), record.clone());
        Ok(())
    }

    async fn soft_delete(&self, local_id: &str) -> Result<bool> {
        self.check_writable()?;
        Ok(match self.records.lock().get_mut(local_id) {
            Some(record) => {
                record.deleted = true;
                true
            }
            None => false,
        })
    }

    async fn hard_delete(&self, local_id: &str) -> Result<bool> {
        self.check_writable()?;
        Ok(self.records.lock().remove(local_id).is_some())
    }

    async fn scan_not_deleted(&self) -> Result<Vec<Record>> {
        Ok(self.scan(false))
    }

    async fn scan_deleted(&self) -> Result<Vec<Record>> {
        Ok(self.scan(true))
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.records.lock().is_empty())
    }

    async fn clear(&self) -> Result<()> {
        self.check_writable()?;
        self.records.lock().clear();
        Ok(())
    }
}

/// A shared in-memory "connection": one [`MemoryStore`] per table name,
/// kept for the lifetime of the backend so tables survive being reopened.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new backend wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// The store behind a table, if it was ever opened.
    pub fn store(&self, table: &str) -> Option<Arc<MemoryStore>> {
        self.stores.lock().get(table).cloned()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn open(&self, table: &str) -> Result<Arc<dyn RecordStore>> {
        let store = self
            .stores
            .lock()
            .entry(table.to_string())
            .or_default()
            .clone();
        Ok(store)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<Arc<dyn RecordStore>> {
        let mut stores = self.stores.lock();
        if from == to {
            return Ok(stores.entry(to.to_string()).or_default().clone());
        }
        let previous = stores.remove(from);
        let store = match stores.get(to) {
            Some(existing) => existing.clone(),
            None => {
                let moved = previous.unwrap_or_default();
                stores.insert(to.to_string(), moved.clone());
                moved
            }
        };
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ServerId;
    use serde_json::json;

    fn record(name: &str, updated_at: u64) -> Record {
        Record::new(json!({ "name": name }).as_object().cloned().unwrap(), updated_at)
    }

    #[tokio::test]
    async fn put_get_and_scan() {
        let store = MemoryStore::new();
        assert!(store.is_empty().await.unwrap());

        let a = record("a", 1);
        let b = record("b", 2);
        store.put(&a).await.unwrap();
        store.put(&b).await.unwrap();

        assert_eq!(store.get(&a.local_id).await.unwrap(), Some(a.clone()));
        let live = store.scan_not_deleted().await.unwrap();
        assert_eq!(live, vec![a, b]);
        assert!(store.scan_deleted().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn soft_delete_moves_record_to_tombstones() {
        let store = MemoryStore::new();
        let a = record("a", 1);
        store.put(&a).await.unwrap();

        assert!(store.soft_delete(&a.local_id).await.unwrap());
        assert!(!store.soft_delete("cid-missing").await.unwrap());
        assert!(store.scan_not_deleted().await.unwrap().is_empty());
        assert_eq!(store.scan_deleted().await.unwrap().len(), 1);
        assert!(!store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn hard_delete_and_clear() {
        let store = MemoryStore::new();
        let a = record("a", 1);
        let b = record("b", 2);
        store.put(&a).await.unwrap();
        store.put(&b).await.unwrap();

        assert!(store.hard_delete(&a.local_id).await.unwrap());
        assert!(!store.hard_delete(&a.local_id).await.unwrap());
        assert_eq!(store.len(), 1);

        store.clear().await.unwrap();
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn find_by_server_id_includes_tombstones() {
        let store = MemoryStore::new();
        let a = record("a", 1).with_server_id(ServerId::from(20));
        store.put(&a).await.unwrap();
        store.soft_delete(&a.local_id).await.unwrap();

        let found = store.find_by_server_id(&ServerId::from(20)).await.unwrap();
        assert_eq!(found.map(|r| r.local_id), Some(a.local_id));
        assert!(store
            .find_by_server_id(&ServerId::from(21))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn failing_writes_surface_storage_errors() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        let result = store.put(&record("a", 1)).await;
        assert!(matches!(result, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn backend_shares_one_store_per_table() {
        let backend = MemoryBackend::new();
        let first = backend.open("books").await.unwrap();
        first.put(&record("a", 1)).await.unwrap();

        let again = backend.open("books").await.unwrap();
        assert!(!again.is_empty().await.unwrap());

        let other = backend.open("authors").await.unwrap();
        assert!(other.is_empty().await.unwrap());
        assert_eq!(backend.store("books").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rename_moves_rows_to_a_new_name() {
        let backend = MemoryBackend::new();
        let books = backend.open("books").await.unwrap();
        books.put(&record("a", 1)).await.unwrap();

        let renamed = backend.rename("books", "books_v2").await.unwrap();
        assert!(!renamed.is_empty().await.unwrap());
        assert!(backend.store("books").is_none());
        assert_eq!(backend.store("books_v2").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rename_onto_existing_store_switches_and_drops_old() {
        let backend = MemoryBackend::new();
        let books = backend.open("books").await.unwrap();
        books.put(&record("old", 1)).await.unwrap();
        let archive = backend.open("archive").await.unwrap();
        archive.put(&record("kept", 1)).await.unwrap();
        archive.put(&record("kept too", 2)).await.unwrap();

        let switched = backend.rename("books", "archive").await.unwrap();
        assert_eq!(switched.scan_not_deleted().await.unwrap().len(), 2);
        assert!(backend.store("books").is_none());
    }
}
