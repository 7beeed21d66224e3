//! # Stash Engine
//!
//! An offline-first record synchronization engine.
//!
//! Applications read and write records in a local store while disconnected.
//! When connectivity is available, the engine reconciles local changes with a
//! remote system in both directions.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! Every record carries:
//! - A stable local id (`cid-` tagged UUID), assigned at creation
//! - A server id, bound once the server accepts the record
//! - A dirty flag (local change not yet pushed)
//! - A tombstone flag (deleted locally, deletion not yet flushed)
//! - An `updated_at` timestamp, the only conflict-resolution signal
//!
//! ### Tables and key fields
//!
//! A [`Table`] is a named collection of records. Key fields reference
//! records in other tables; locally they hold local ids and are translated
//! to server ids only on the wire. Tables are always synced after the
//! tables they reference.
//!
//! ### Synchronization
//!
//! - [`Table::pull`] merges the remote list into the local table
//!   (last writer wins on `updated_at`)
//! - [`Table::push`] uploads dirty records and flushes tombstones
//! - [`Table::incremental`] runs both, after the referenced tables
//! - [`Table::full`] replaces the local table with the remote one
//!
//! ## Quick Start
//!
//! ```rust
//! use stash_engine::{Database, MemoryBackend, Method, MockTransport, Reply, Subject, SyncOptions, TableSchema};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let remote = Arc::new(MockTransport::new());
//! let db = Database::builder(Arc::new(MemoryBackend::new()), remote.clone())
//!     .table(TableSchema::new("authors"))
//!     .table(TableSchema::new("books").key("author_id", "authors"))
//!     .build()
//!     .await
//!     .unwrap();
//!
//! let attrs = json!({"name": "Frank Herbert"}).as_object().cloned().unwrap();
//! let reply = db
//!     .dispatch(Method::Create, Subject::new_record("authors", attrs), SyncOptions::new())
//!     .await
//!     .unwrap();
//! let Reply::Record(author) = reply else { unreachable!() };
//!
//! let books = db.table("books").unwrap();
//! let attrs = json!({"title": "Dune", "author_id": author["id"]}).as_object().cloned().unwrap();
//! books.create(attrs, SyncOptions::new()).await.unwrap();
//!
//! // Pushes the author first, then the book with its key remapped.
//! books.incremental(SyncOptions::new()).await.unwrap();
//! assert_eq!(remote.records("books")[0]["author_id"], json!(1));
//! # });
//! ```

pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod id;
pub mod operation;
pub mod reconcile;
pub mod record;
pub mod remap;
pub mod schema;
pub mod store;
pub mod table;
pub mod transport;

// Re-export main types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{HttpConfig, SyncConfig};
pub use database::{Database, DatabaseBuilder};
pub use error::{Error, Result};
pub use id::{generate_local_id, is_local_id, IdentityChange, ServerId};
pub use operation::{Method, Reply, Subject, SyncOptions};
pub use reconcile::{RecordFailure, SyncReport};
pub use record::{Record, RemoteRecord};
pub use remap::{Direction, KeyRemapper};
pub use schema::{FieldDef, FieldType, KeyField, Schema, TableSchema};
#[cfg(feature = "sqlite")]
pub use store::SqliteBackend;
pub use store::{MemoryBackend, RecordStore, StorageBackend};
pub use table::Table;
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::{
    AlwaysOnline, Connectivity, MockTransport, NetworkStatus, Transport, TransportRequest,
};

/// Type aliases for clarity
pub type LocalId = String;
pub type TableName = String;
pub type Timestamp = u64;
pub type Attributes = serde_json::Map<String, serde_json::Value>;
