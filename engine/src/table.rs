//! Per-table record adapter.
//!
//! A [`Table`] layers dirty-marking, tombstones and the identity index on top
//! of a raw [`RecordStore`]. It also owns the table's reconciliation state;
//! the sync operations themselves live in [`crate::reconcile`].

use crate::clock::{parse_timestamp, Clock};
use crate::config::SyncConfig;
use crate::id::{generate_local_id, IdentityChange, IdentityIndex, ServerId};
use crate::reconcile::Coalescer;
use crate::remap::{KeyRemapper, SharedIndex};
use crate::schema::TableSchema;
use crate::store::{RecordStore, StorageBackend};
use crate::transport::{Connectivity, Transport, TransportRequest};
use crate::{error::Result, Attributes, Error, Record, SyncOptions, TableName};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const IDENTITY_CHANNEL_CAPACITY: usize = 256;

/// Collaborators shared by every table of a database.
pub(crate) struct SyncContext {
    pub backend: Arc<dyn StorageBackend>,
    pub transport: Arc<dyn Transport>,
    pub connectivity: Arc<dyn Connectivity>,
    pub clock: Arc<dyn Clock>,
    pub config: SyncConfig,
}

/// One synchronized table.
pub struct Table {
    pub(crate) schema: TableSchema,
    store: RwLock<Arc<dyn RecordStore>>,
    /// Name of the local storage partition; starts as the table name
    storage_name: RwLock<String>,
    pub(crate) index: SharedIndex,
    pub(crate) remapper: KeyRemapper,
    /// Transitive dependencies grouped by depth, deepest level first
    pub(crate) dependencies: Vec<Vec<Arc<Table>>>,
    pub(crate) context: Arc<SyncContext>,
    pub(crate) identity_tx: broadcast::Sender<IdentityChange>,
    pending_reconnect: AtomicBool,
    pub(crate) full_sync: Coalescer,
    pub(crate) pull_sync: Coalescer,
    pub(crate) push_sync: Coalescer,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.schema.name)
            .field("stored", &self.is_stored())
            .field("identities", &self.index.read().len())
            .finish()
    }
}

impl Table {
    /// Open a table over `store`, rebuilding the identity index from the
    /// stored rows.
    pub(crate) async fn open(
        schema: TableSchema,
        store: Arc<dyn RecordStore>,
        remapper: KeyRemapper,
        dependencies: Vec<Vec<Arc<Table>>>,
        context: Arc<SyncContext>,
    ) -> Result<Self> {
        let index = if schema.storage && store.is_supported() {
            load_index(store.as_ref()).await?
        } else {
            IdentityIndex::new()
        };
        debug!(table = %schema.name, records = index.len(), "Opened table");

        let cooldown = context.config.min_interval;
        let (identity_tx, _) = broadcast::channel(IDENTITY_CHANNEL_CAPACITY);
        Ok(Self {
            storage_name: RwLock::new(schema.name.clone()),
            schema,
            store: RwLock::new(store),
            index: Arc::new(RwLock::new(index)),
            remapper,
            dependencies,
            context,
            identity_tx,
            pending_reconnect: AtomicBool::new(false),
            full_sync: Coalescer::new(cooldown),
            pull_sync: Coalescer::new(cooldown),
            push_sync: Coalescer::new(cooldown),
        })
    }

    pub fn name(&self) -> &TableName {
        &self.schema.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub(crate) fn store(&self) -> Arc<dyn RecordStore> {
        self.store.read().clone()
    }

    /// Name of the local storage partition. The remote collection keeps
    /// the table name.
    pub fn storage_name(&self) -> String {
        self.storage_name.read().clone()
    }

    /// Move local storage to the partition `name`. If that partition already
    /// exists the table switches to it and the current one is dropped.
    pub async fn set_name(&self, name: &str) -> Result<()> {
        let current = self.storage_name();
        if current == name {
            return Ok(());
        }
        let store = self.context.backend.rename(&current, name).await?;
        let index = load_index(store.as_ref()).await?;
        *self.store.write() = store;
        *self.index.write() = index;
        *self.storage_name.write() = name.to_string();
        info!(table = %self.schema.name, from = %current, to = name, "Renamed local storage");
        Ok(())
    }

    /// Whether records of this table are kept locally.
    pub fn is_stored(&self) -> bool {
        self.schema.storage && self.store().is_supported()
    }

    /// Plain attribute view of a record, identity under the configured id
    /// attribute.
    pub fn view(&self, record: &Record) -> serde_json::Value {
        record.to_json(&self.context.config.id_attribute)
    }

    /// Receive an event every time a record of this table is bound to a
    /// server identity.
    pub fn subscribe_identity_changes(&self) -> broadcast::Receiver<IdentityChange> {
        self.identity_tx.subscribe()
    }

    /// Current server id of a record, if it has one.
    pub fn server_id(&self, local_id: &str) -> Option<ServerId> {
        self.index.read().server_id(local_id).flatten().cloned()
    }

    /// Local id of the record bound to `server_id`.
    pub fn local_id(&self, server_id: &ServerId) -> Option<String> {
        self.index.read().local_id(server_id).cloned()
    }

    /// Create a record with a fresh local id.
    pub async fn create(&self, mut attributes: Attributes, options: SyncOptions) -> Result<Record> {
        self.schema.validate_attributes(&attributes)?;
        attributes.remove(&self.context.config.id_attribute);

        let record = if options.local {
            let updated_at =
                parse_timestamp(attributes.get(&self.context.config.updated_at_attribute));
            Record::new(attributes, updated_at)
        } else {
            let mut record = Record::new(attributes, self.context.clock.now());
            record.dirty = true;
            record
        };
        self.persist(&record).await?;
        debug!(table = %self.schema.name, local_id = %record.local_id, "Created record");
        Ok(record)
    }

    /// Replace the attributes of a live record.
    pub async fn update(
        &self,
        local_id: &str,
        mut attributes: Attributes,
        options: SyncOptions,
    ) -> Result<Record> {
        self.schema.validate_attributes(&attributes)?;
        attributes.remove(&self.context.config.id_attribute);

        let mut record = self.find(local_id).await?;
        if options.local {
            record.attributes = attributes;
        } else {
            record.touch(attributes, self.context.clock.now());
        }
        self.persist(&record).await?;
        debug!(table = %self.schema.name, local_id, "Updated record");
        Ok(record)
    }

    /// Insert or replace a full record.
    pub async fn save(&self, mut record: Record, options: SyncOptions) -> Result<Record> {
        self.schema.validate_attributes(&record.attributes)?;
        record.attributes.remove(&self.context.config.id_attribute);

        if options.regenerate_identity {
            record.local_id = generate_local_id();
        }
        if !options.local {
            record.updated_at = self.context.clock.now();
            record.dirty = true;
        }
        self.persist(&record).await?;
        Ok(record)
    }

    /// Delete a record. Records the server has never seen (and local-only
    /// deletes) disappear immediately; the rest become tombstones until a
    /// push flushes them.
    pub async fn destroy(&self, local_id: &str, options: SyncOptions) -> Result<()> {
        let record = self
            .store()
            .get(local_id)
            .await?
            .ok_or_else(|| Error::RecordNotFound(local_id.to_string()))?;

        if options.local || record.is_local_only() {
            self.erase(local_id).await?;
        } else if !self.store().soft_delete(local_id).await? {
            return Err(Error::RecordNotFound(local_id.to_string()));
        }
        debug!(table = %self.schema.name, local_id, "Destroyed record");
        Ok(())
    }

    /// Physically remove a record, tombstone or not.
    pub async fn remove(&self, local_id: &str) -> Result<bool> {
        self.erase(local_id).await
    }

    /// A live record by local id.
    pub async fn find(&self, local_id: &str) -> Result<Record> {
        match self.store().get(local_id).await? {
            Some(record) if record.is_active() => Ok(record),
            _ => Err(Error::RecordNotFound(local_id.to_string())),
        }
    }

    /// All live records. Unless `options.local` is set, an empty table is
    /// bootstrapped with a full sync first; a failed bootstrap still returns
    /// the (empty) local read.
    pub async fn find_all(self: &Arc<Self>, options: SyncOptions) -> Result<Vec<Record>> {
        if !options.local && self.store().is_empty().await? {
            if let Err(err) = self.full(options).await {
                warn!(table = %self.schema.name, error = %err, "Bootstrap sync failed");
            }
        }
        self.store().scan_not_deleted().await
    }

    /// Whether the record bound to `server_id` is a tombstone.
    pub async fn is_deleted(&self, server_id: &ServerId) -> Result<bool> {
        Ok(self
            .store()
            .find_by_server_id(server_id)
            .await?
            .is_some_and(|r| r.deleted))
    }

    /// Server ids of every tombstone awaiting flush.
    pub async fn deleted_items(&self) -> Result<Vec<ServerId>> {
        Ok(self
            .store()
            .scan_deleted()
            .await?
            .into_iter()
            .filter_map(|r| r.server_id)
            .collect())
    }

    /// Whether the table holds nothing at all; tombstones count as content.
    pub async fn is_empty(&self) -> Result<bool> {
        self.store().is_empty().await
    }

    /// Drop every local row.
    pub async fn clear(&self) -> Result<()> {
        self.store().clear().await?;
        self.index.write().clear();
        Ok(())
    }

    pub(crate) async fn persist(&self, record: &Record) -> Result<()> {
        self.store().put(record).await?;
        self.index
            .write()
            .insert(&record.local_id, record.server_id.as_ref());
        Ok(())
    }

    pub(crate) async fn erase(&self, local_id: &str) -> Result<bool> {
        let removed = self.store().hard_delete(local_id).await?;
        self.index.write().remove(local_id);
        Ok(removed)
    }

    pub(crate) fn publish_identity(&self, local_id: &str, server_id: &ServerId) {
        // No subscribers is fine.
        let _ = self.identity_tx.send(IdentityChange {
            table: self.schema.name.clone(),
            local_id: local_id.to_string(),
            server_id: server_id.clone(),
        });
    }

    /// Send a request through the transport, honouring connectivity.
    ///
    /// While offline nothing is sent and the table remembers it missed a
    /// call. The first successful call afterwards schedules an incremental
    /// sync in the background.
    pub(crate) async fn send(self: &Arc<Self>, request: TransportRequest) -> Result<serde_json::Value> {
        if !self.context.connectivity.is_online() {
            self.pending_reconnect.store(true, Ordering::SeqCst);
            debug!(table = %self.schema.name, request = %request.target(), "Offline, request skipped");
            return Err(Error::Offline);
        }

        let response = self.context.transport.send(request).await?;

        if self.pending_reconnect.swap(false, Ordering::SeqCst) {
            info!(table = %self.schema.name, "Connectivity restored, scheduling incremental sync");
            let table = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(err) = table.incremental(SyncOptions::new()).await {
                    warn!(table = %table.schema.name, error = %err, "Reconnect sync failed");
                }
            });
        }
        Ok(response)
    }

    /// Whether a missed call is waiting for connectivity.
    pub fn is_pending_reconnect(&self) -> bool {
        self.pending_reconnect.load(Ordering::SeqCst)
    }
}

async fn load_index(store: &dyn RecordStore) -> Result<IdentityIndex> {
    let mut index = IdentityIndex::new();
    let mut rows = store.scan_not_deleted().await?;
    rows.extend(store.scan_deleted().await?);
    for record in &rows {
        index.insert(&record.local_id, record.server_id.as_ref());
    }
    Ok(index)
}
