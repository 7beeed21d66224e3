//! Identity allocation.
//!
//! Records carry two identities. The local id is assigned on first local
//! creation and never changes; it is a tagged UUID so it can never collide
//! with anything the server hands out. The server id is bound once the
//! server has accepted the record.

use crate::{LocalId, TableName};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Prefix tagging client-generated identifiers.
pub const LOCAL_ID_PREFIX: &str = "cid-";

const UUID_GROUPS: [usize; 5] = [8, 4, 4, 4, 12];

/// Generate a fresh local identifier (`cid-` followed by a UUID v4).
pub fn generate_local_id() -> LocalId {
    format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4().hyphenated())
}

/// Structural test for identifiers produced by [`generate_local_id`].
pub fn is_local_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix(LOCAL_ID_PREFIX) else {
        return false;
    };
    let mut groups = rest.split('-');
    for expected in UUID_GROUPS {
        match groups.next() {
            Some(g) if g.len() == expected && g.bytes().all(|b| b.is_ascii_alphanumeric()) => {}
            _ => return false,
        }
    }
    groups.next().is_none()
}

/// Identifier assigned and owned by the remote system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Read a server id from a JSON value. Strings and numbers are accepted;
    /// empty strings, nulls and structured values are not identities.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            serde_json::Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// JSON form for the wire. Integer ids go back out as numbers.
    pub fn to_value(&self) -> serde_json::Value {
        match self.0.parse::<i64>() {
            Ok(n) if n.to_string() == self.0 => serde_json::Value::from(n),
            _ => serde_json::Value::String(self.0.clone()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<i64> for ServerId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// Published when a record's server identity is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityChange {
    pub table: TableName,
    pub local_id: LocalId,
    pub server_id: ServerId,
}

/// In-memory map between the two identifier spaces of one table.
///
/// Every stored record (tombstones included) has an entry keyed by local id;
/// records that reached the server also appear in the reverse map.
#[derive(Debug, Default, Clone)]
pub struct IdentityIndex {
    by_local: HashMap<LocalId, Option<ServerId>>,
    by_server: HashMap<ServerId, LocalId>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or rebind) the identities of a stored record.
    pub fn insert(&mut self, local_id: &str, server_id: Option<&ServerId>) {
        if let Some(Some(previous)) = self.by_local.get(local_id) {
            if Some(previous) != server_id {
                self.by_server.remove(previous);
            }
        }
        if let Some(sid) = server_id {
            self.by_server.insert(sid.clone(), local_id.to_string());
        }
        self.by_local
            .insert(local_id.to_string(), server_id.cloned());
    }

    /// Forget a hard-deleted record.
    pub fn remove(&mut self, local_id: &str) {
        if let Some(Some(sid)) = self.by_local.remove(local_id) {
            if self.by_server.get(&sid).map(String::as_str) == Some(local_id) {
                self.by_server.remove(&sid);
            }
        }
    }

    pub fn clear(&mut self) {
        self.by_local.clear();
        self.by_server.clear();
    }

    /// `None` when the local id is unknown, `Some(None)` when the record has
    /// not reached the server yet.
    pub fn server_id(&self, local_id: &str) -> Option<Option<&ServerId>> {
        self.by_local.get(local_id).map(Option::as_ref)
    }

    pub fn local_id(&self, server_id: &ServerId) -> Option<&LocalId> {
        self.by_server.get(server_id)
    }

    /// Snapshot of every server id and the local id bound to it.
    pub fn server_bindings(&self) -> HashMap<ServerId, LocalId> {
        self.by_server.clone()
    }

    pub fn len(&self) -> usize {
        self.by_local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_local.is_empty()
    }
}
