//! Reconciliation between local tables and the remote system.
//!
//! # Algorithm
//!
//! **Pull** downloads the full remote list, hard-deletes every live local
//! record whose server id is no longer listed, then merges each remote record:
//!
//! 1. A live local record with the same server id is overwritten iff its
//!    `updated_at` is strictly older (last writer wins).
//! 2. A tombstone for that server id means the record is skipped.
//! 3. Otherwise a clean local record bound to the server id is created.
//!
//! **Push** uploads every live record that is dirty or has never reached the
//! server and flushes tombstones. A record edited while its upload was in
//! flight stays dirty.
//!
//! **Full** replaces the local table with the remote one; records the server
//! still lists keep their local ids. **Incremental** is pull followed by push.
//!
//! Each of full, pull and push is coalesced per table: callers arriving
//! while one is running join it, and a successful pull or push is reused
//! for a short cooldown afterwards.

use crate::id::ServerId;
use crate::record::{to_wire, RemoteRecord};
use crate::remap::Direction;
use crate::table::Table;
use crate::transport::TransportRequest;
use crate::{error::Result, Error, LocalId, Record, SyncOptions, TableName};
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A record that could not be synchronized.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFailure {
    /// Local id, or the server id when no local record is involved
    pub id: String,
    #[serde(serialize_with = "display")]
    pub error: Error,
}

fn display<S: serde::Serializer>(error: &Error, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_str(error)
}

/// Outcome of one sync operation on one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub table: TableName,
    /// Remote records stored locally for the first time
    pub created: usize,
    /// Local records overwritten by a newer remote version
    pub updated: usize,
    /// Remote records older than (or as old as) the local version
    pub unchanged: usize,
    /// Remote records ignored because a local tombstone exists
    pub skipped: usize,
    /// Local records deleted because the server no longer has them
    pub destroyed: usize,
    /// Records uploaded
    pub pushed: usize,
    /// Tombstones flushed
    pub flushed: usize,
    pub failures: Vec<RecordFailure>,
}

impl SyncReport {
    pub fn new(table: impl Into<TableName>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn record_failure(&mut self, id: impl Into<String>, error: Error) {
        self.failures.push(RecordFailure {
            id: id.into(),
            error,
        });
    }

    /// Number of records the operation touched or tried to.
    pub fn attempted(&self) -> usize {
        self.created
            + self.updated
            + self.unchanged
            + self.skipped
            + self.destroyed
            + self.pushed
            + self.flushed
            + self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold another report for the same table into this one.
    pub fn merge(&mut self, other: SyncReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.destroyed += other.destroyed;
        self.pushed += other.pushed;
        self.flushed += other.flushed;
        self.failures.extend(other.failures);
    }

    /// `Ok` when nothing failed, [`Error::Batch`] otherwise.
    pub fn into_result(self) -> Result<SyncReport> {
        if self.is_clean() {
            Ok(self)
        } else {
            Err(Error::Batch(Box::new(self)))
        }
    }
}

/// Recover the report from a batch failure; other errors pass through.
fn partial(result: Result<SyncReport>) -> Result<SyncReport> {
    match result {
        Err(Error::Batch(report)) => Ok(*report),
        other => other,
    }
}

#[derive(Debug, Clone)]
struct Settled {
    result: Result<SyncReport>,
    at: Instant,
}

type SharedSync = Shared<BoxFuture<'static, Settled>>;

/// Deduplicates one kind of sync operation on one table.
pub(crate) struct Coalescer {
    slot: Mutex<Option<SharedSync>>,
    cooldown: Duration,
}

impl Coalescer {
    pub(crate) fn new(cooldown: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            cooldown,
        }
    }

    /// Join the running (or recently successful) operation, or start a new
    /// one with `start`. The decision is taken when this is called, not when
    /// the returned future is first polled.
    pub(crate) fn join_or_start<F>(&self, start: F) -> BoxFuture<'static, Result<SyncReport>>
    where
        F: FnOnce() -> BoxFuture<'static, Result<SyncReport>>,
    {
        let mut slot = self.slot.lock();
        if let Some(shared) = slot.as_ref() {
            let reusable = match shared.peek() {
                None => true,
                Some(settled) => settled.result.is_ok() && settled.at.elapsed() < self.cooldown,
            };
            if reusable {
                return wait(shared.clone());
            }
        }

        let operation = start();
        let shared = async move {
            let result = operation.await;
            Settled {
                result,
                at: Instant::now(),
            }
        }
        .boxed()
        .shared();
        *slot = Some(shared.clone());
        wait(shared)
    }
}

fn wait(shared: SharedSync) -> BoxFuture<'static, Result<SyncReport>> {
    async move { shared.await.result }.boxed()
}

enum Merge {
    Created,
    Updated,
    Unchanged,
    Skipped,
}

impl Table {
    /// Replace the local table with the remote one.
    pub fn full(self: &Arc<Self>, options: SyncOptions) -> BoxFuture<'static, Result<SyncReport>> {
        let table = Arc::clone(self);
        self.full_sync
            .join_or_start(move || table.run_full(options).boxed())
    }

    /// Download the remote list and merge it into the local table.
    pub fn pull(self: &Arc<Self>, options: SyncOptions) -> BoxFuture<'static, Result<SyncReport>> {
        let table = Arc::clone(self);
        self.pull_sync
            .join_or_start(move || table.run_pull(options).boxed())
    }

    /// Upload local changes and flush tombstones.
    pub fn push(self: &Arc<Self>, options: SyncOptions) -> BoxFuture<'static, Result<SyncReport>> {
        let table = Arc::clone(self);
        self.push_sync
            .join_or_start(move || table.run_push(options).boxed())
    }

    /// Dependencies, then pull, then push.
    pub fn incremental(
        self: &Arc<Self>,
        options: SyncOptions,
    ) -> BoxFuture<'static, Result<SyncReport>> {
        let table = Arc::clone(self);
        async move {
            if !options.ignore_dependencies {
                table.sync_dependencies().await?;
            }
            let options = options.ignore_dependencies();
            let mut report = partial(table.pull(options).await)?;
            report.merge(partial(table.push(options).await)?);
            report.into_result()
        }
        .boxed()
    }

    /// Run an incremental sync on every table this one references, level by
    /// level from the deepest. The first failure aborts.
    pub(crate) async fn sync_dependencies(&self) -> Result<()> {
        for level in &self.dependencies {
            let results = join_all(
                level
                    .iter()
                    .map(|dep| dep.incremental(SyncOptions::new().ignore_dependencies())),
            )
            .await;
            for result in results {
                if let Err(err) = result {
                    warn!(table = %self.name(), error = %err, "Dependency sync failed");
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    async fn download(self: &Arc<Self>, report: &mut SyncReport) -> Result<Vec<RemoteRecord>> {
        let response = self.send(TransportRequest::read_all(self.name())).await?;
        let serde_json::Value::Array(items) = response else {
            return Err(Error::Transport {
                status: None,
                reason: format!("expected a list of '{}' records", self.name()),
            });
        };

        let config = &self.context.config;
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let id = item
                .get(&config.id_attribute)
                .map(|v| v.to_string())
                .unwrap_or_default();
            match RemoteRecord::from_wire(item, &config.id_attribute, &config.updated_at_attribute)
            {
                Ok(mut remote) => {
                    remote.attributes.remove(&config.updated_at_attribute);
                    records.push(remote);
                }
                Err(err) => report.record_failure(id, err),
            }
        }
        Ok(records)
    }

    async fn run_full(self: Arc<Self>, options: SyncOptions) -> Result<SyncReport> {
        let mut report = SyncReport::new(self.name());
        if !self.is_stored() {
            return Ok(report);
        }
        if !options.ignore_dependencies {
            self.sync_dependencies().await?;
        }

        let remote = self.download(&mut report).await?;
        // Records the server still lists keep their local ids, so key fields
        // in other tables stay valid.
        let previous = self.index.read().server_bindings();
        self.clear().await?;

        let results = join_all(remote.into_iter().map(|r| {
            let table = Arc::clone(&self);
            let local_id = previous.get(&r.server_id).cloned();
            async move {
                let id = r.server_id.to_string();
                (id, table.store_remote(r, local_id).await)
            }
        }))
        .await;
        for (id, result) in results {
            match result {
                Ok(()) => report.created += 1,
                Err(err) => report.record_failure(id, err),
            }
        }

        info!(table = %self.name(), created = report.created, failed = report.failures.len(), "Full sync finished");
        report.into_result()
    }

    /// Store a remote record under `local_id`, or a fresh one.
    async fn store_remote(&self, remote: RemoteRecord, local_id: Option<LocalId>) -> Result<()> {
        let attributes = self.remapper.remap(&remote.attributes, Direction::ToLocal)?;
        let mut record =
            Record::new(attributes, remote.updated_at).with_server_id(remote.server_id);
        if let Some(local_id) = local_id {
            record.local_id = local_id;
        }
        self.persist(&record).await
    }

    async fn run_pull(self: Arc<Self>, options: SyncOptions) -> Result<SyncReport> {
        let mut report = SyncReport::new(self.name());
        if !self.is_stored() {
            return Ok(report);
        }
        if !options.ignore_dependencies {
            self.sync_dependencies().await?;
        }

        let remote = self.download(&mut report).await?;

        let listed: HashSet<&ServerId> = remote.iter().map(|r| &r.server_id).collect();
        for record in self.store().scan_not_deleted().await? {
            let Some(sid) = &record.server_id else {
                continue;
            };
            if listed.contains(sid) {
                continue;
            }
            match self.erase(&record.local_id).await {
                Ok(_) => {
                    debug!(table = %self.name(), local_id = %record.local_id, server_id = %sid, "Removed record deleted on server");
                    report.destroyed += 1;
                }
                Err(err) => report.record_failure(record.local_id, err),
            }
        }

        let results = join_all(remote.into_iter().map(|r| {
            let table = Arc::clone(&self);
            async move {
                let id = r.server_id.to_string();
                (id, table.merge_remote(r).await)
            }
        }))
        .await;
        for (id, result) in results {
            match result {
                Ok(Merge::Created) => report.created += 1,
                Ok(Merge::Updated) => report.updated += 1,
                Ok(Merge::Unchanged) => report.unchanged += 1,
                Ok(Merge::Skipped) => report.skipped += 1,
                Err(err) => report.record_failure(id, err),
            }
        }

        info!(
            table = %self.name(),
            created = report.created,
            updated = report.updated,
            destroyed = report.destroyed,
            failed = report.failures.len(),
            "Pull finished"
        );
        report.into_result()
    }

    async fn merge_remote(&self, remote: RemoteRecord) -> Result<Merge> {
        let existing = match self.local_id(&remote.server_id) {
            Some(local_id) => self.store().get(&local_id).await?,
            None => None,
        };

        match existing {
            Some(record) if record.deleted => Ok(Merge::Skipped),
            Some(mut record) => {
                if record.updated_at >= remote.updated_at {
                    return Ok(Merge::Unchanged);
                }
                record.attributes = self.remapper.remap(&remote.attributes, Direction::ToLocal)?;
                record.updated_at = remote.updated_at;
                record.dirty = false;
                self.persist(&record).await?;
                Ok(Merge::Updated)
            }
            None => {
                self.store_remote(remote, None).await?;
                Ok(Merge::Created)
            }
        }
    }

    async fn run_push(self: Arc<Self>, options: SyncOptions) -> Result<SyncReport> {
        let mut report = SyncReport::new(self.name());
        if !self.is_stored() {
            return Ok(report);
        }
        if !options.ignore_dependencies {
            self.sync_dependencies().await?;
        }

        let candidates: Vec<Record> = self
            .store()
            .scan_not_deleted()
            .await?
            .into_iter()
            .filter(Record::needs_push)
            .collect();
        let tombstones = self.store().scan_deleted().await?;

        let uploads = join_all(candidates.into_iter().map(|record| {
            let table = Arc::clone(&self);
            async move {
                let id = record.local_id.clone();
                (id, table.push_record(record).await)
            }
        }));
        let flushes = join_all(tombstones.into_iter().map(|record| {
            let table = Arc::clone(&self);
            async move {
                let id = record.local_id.clone();
                (id, table.flush_tombstone(record).await)
            }
        }));
        let (uploaded, flushed) = futures::join!(uploads, flushes);

        for (id, result) in uploaded {
            match result {
                Ok(()) => report.pushed += 1,
                Err(err) => {
                    debug!(table = %self.name(), local_id = %id, error = %err, "Upload failed");
                    report.record_failure(id, err);
                }
            }
        }
        for (id, result) in flushed {
            match result {
                Ok(()) => report.flushed += 1,
                Err(err) => report.record_failure(id, err),
            }
        }

        info!(
            table = %self.name(),
            pushed = report.pushed,
            flushed = report.flushed,
            failed = report.failures.len(),
            "Push finished"
        );
        report.into_result()
    }

    async fn push_record(self: &Arc<Self>, snapshot: Record) -> Result<()> {
        let config = &self.context.config;
        let attributes = self.remapper.remap(&snapshot.attributes, Direction::ToServer)?;
        let body = to_wire(
            attributes,
            snapshot.server_id.as_ref(),
            snapshot.updated_at,
            &config.id_attribute,
            &config.updated_at_attribute,
        );
        let request = match &snapshot.server_id {
            Some(sid) => TransportRequest::update(self.name(), sid.clone(), body),
            None => TransportRequest::create(self.name(), body),
        };

        let response = self.send(request).await?;
        let server_id = match &snapshot.server_id {
            Some(sid) => sid.clone(),
            None => response
                .get(&config.id_attribute)
                .and_then(ServerId::from_value)
                .ok_or_else(|| {
                    Error::InvalidRecord(format!(
                        "server response for '{}' has no '{}'",
                        self.name(),
                        config.id_attribute
                    ))
                })?,
        };

        let Some(mut current) = self.store().get(&snapshot.local_id).await? else {
            warn!(table = %self.name(), local_id = %snapshot.local_id, "Record removed during upload");
            return Ok(());
        };
        let newly_bound = current.server_id.as_ref() != Some(&server_id);
        current.server_id = Some(server_id.clone());
        if current.updated_at == snapshot.updated_at {
            current.dirty = false;
        }
        self.persist(&current).await?;

        if newly_bound {
            debug!(table = %self.name(), local_id = %current.local_id, server_id = %server_id, "Bound server identity");
            self.publish_identity(&current.local_id, &server_id);
        }
        Ok(())
    }

    async fn flush_tombstone(self: &Arc<Self>, record: Record) -> Result<()> {
        if let Some(sid) = &record.server_id {
            match self
                .send(TransportRequest::delete(self.name(), sid.clone()))
                .await
            {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {
                    debug!(table = %self.name(), server_id = %sid, "Already gone on server");
                }
                Err(err) => return Err(err),
            }
        }
        self.erase(&record.local_id).await?;
        Ok(())
    }
}
