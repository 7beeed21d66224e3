//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use stash_engine::{
    Attributes, Database, ManualClock, MemoryBackend, MockTransport, NetworkStatus, SyncConfig,
    TableSchema,
};
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub db: Database,
    pub backend: Arc<MemoryBackend>,
    pub remote: Arc<MockTransport>,
    pub clock: Arc<ManualClock>,
    pub network: NetworkStatus,
}

/// A database over memory storage and a mock remote, with the cooldown
/// disabled so back-to-back syncs always hit the remote.
pub async fn harness(tables: Vec<TableSchema>) -> Harness {
    harness_with(tables, SyncConfig::new().with_min_interval(Duration::ZERO)).await
}

pub async fn harness_with(tables: Vec<TableSchema>, config: SyncConfig) -> Harness {
    let backend = MemoryBackend::new_shared();
    let remote = Arc::new(MockTransport::new());
    let clock = Arc::new(ManualClock::new(1_000));
    let network = NetworkStatus::default();

    let mut builder = Database::builder(backend.clone(), remote.clone())
        .clock(clock.clone())
        .connectivity(Arc::new(network.clone()))
        .config(config);
    for table in tables {
        builder = builder.table(table);
    }
    let db = builder.build().await.unwrap();

    Harness {
        db,
        backend,
        remote,
        clock,
        network,
    }
}

pub fn attrs(value: serde_json::Value) -> Attributes {
    value.as_object().cloned().unwrap()
}

pub fn library() -> Vec<TableSchema> {
    vec![
        TableSchema::new("authors"),
        TableSchema::new("books").key("author_id", "authors"),
    ]
}
