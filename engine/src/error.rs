//! Error types for the Stash engine.

use crate::reconcile::SyncReport;
use crate::{LocalId, TableName};
use thiserror::Error;

/// All possible errors from the Stash engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Storage errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("record not found: {0}")]
    RecordNotFound(LocalId),

    // Transport errors
    #[error(
        "transport error{}: {}",
        .status.map(|s| format!(" (status {s})")).unwrap_or_default(),
        .reason
    )]
    Transport { status: Option<u16>, reason: String },

    #[error("not found on server: {0}")]
    NotFound(String),

    #[error("offline: request skipped until connectivity returns")]
    Offline,

    // Key remapping errors
    #[error("cannot resolve key field '{field}': no record with id {id} in table '{table}'")]
    KeyResolution {
        field: String,
        table: TableName,
        id: String,
    },

    #[error("key field '{field}' references {local_id} in table '{table}', which has no server id yet")]
    UnresolvedDependency {
        field: String,
        table: TableName,
        local_id: LocalId,
    },

    // Configuration errors
    #[error("table not found: {0}")]
    TableNotFound(TableName),

    #[error("table '{table}' declares key field '{field}' referencing unknown table '{target}'")]
    UnknownTable {
        table: TableName,
        field: String,
        target: TableName,
    },

    #[error("cyclic table dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<TableName>),

    // Validation errors
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Aggregated batch failure
    #[error("{} of {} records failed to sync in table '{}'", .0.failures.len(), .0.attempted(), .0.table)]
    Batch(Box<SyncReport>),
}

impl Error {
    /// Whether the remote side reported the target as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidRecord(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
