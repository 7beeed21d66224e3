//! Operation types shared by the dispatch boundary and the transport.

use crate::{Attributes, TableName};
use serde::{Deserialize, Serialize};

/// The four record operations understood by storage and transport alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Read,
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Read => write!(f, "read"),
            Method::Create => write!(f, "create"),
            Method::Update => write!(f, "update"),
            Method::Delete => write!(f, "delete"),
        }
    }
}

/// Options recognized by local and sync operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Local-only handling: no network implied, no dirty marking, no
    /// timestamp stamping.
    pub local: bool,
    /// Skip syncing dependency tables first.
    pub ignore_dependencies: bool,
    /// Always assign a fresh local identity when storing a remote record.
    pub regenerate_identity: bool,
}

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for purely local handling.
    pub fn local() -> Self {
        Self {
            local: true,
            ..Self::default()
        }
    }

    pub fn with_local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    pub fn ignore_dependencies(mut self) -> Self {
        self.ignore_dependencies = true;
        self
    }

    pub fn regenerate_identity(mut self) -> Self {
        self.regenerate_identity = true;
        self
    }
}

/// What a dispatched operation acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum Subject {
    /// A whole table.
    Collection(TableName),
    /// One record. `id` is a local id for stored tables and a server id for
    /// remote-only tables; it is absent for creates.
    Record {
        table: TableName,
        id: Option<String>,
        attributes: Attributes,
    },
}

impl Subject {
    /// Subject for a single record known by id.
    pub fn record(table: impl Into<TableName>, id: impl Into<String>) -> Self {
        Subject::Record {
            table: table.into(),
            id: Some(id.into()),
            attributes: Attributes::new(),
        }
    }

    /// Subject for a new record.
    pub fn new_record(table: impl Into<TableName>, attributes: Attributes) -> Self {
        Subject::Record {
            table: table.into(),
            id: None,
            attributes,
        }
    }

    /// Subject for an existing record with new attributes.
    pub fn changed_record(
        table: impl Into<TableName>,
        id: impl Into<String>,
        attributes: Attributes,
    ) -> Self {
        Subject::Record {
            table: table.into(),
            id: Some(id.into()),
            attributes,
        }
    }

    pub fn table(&self) -> &TableName {
        match self {
            Subject::Collection(table) => table,
            Subject::Record { table, .. } => table,
        }
    }
}

/// Result of a dispatched operation, in plain attribute form.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Records(Vec<serde_json::Value>),
    Record(serde_json::Value),
    Removed,
}
