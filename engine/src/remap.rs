//! Key field translation between local and server identifier spaces.
//!
//! Locally, key fields always hold local ids. They are translated to server
//! ids only when a wire body is built, and back when a remote record is
//! merged.

use crate::id::{IdentityIndex, ServerId};
use crate::{error::Result, Attributes, Error, TableName};
use parking_lot::RwLock;
use std::sync::Arc;

/// Identity index shared between a table and every remapper reading it.
pub type SharedIndex = Arc<RwLock<IdentityIndex>>;

/// Which identifier space the output should be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToLocal,
    ToServer,
}

#[derive(Debug, Clone)]
struct Binding {
    field: String,
    table: TableName,
    /// `None` for remote-only tables, whose values are server ids already
    index: Option<SharedIndex>,
}

/// Remaps the key fields of one table.
#[derive(Debug, Clone, Default)]
pub struct KeyRemapper {
    bindings: Vec<Binding>,
}

impl KeyRemapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `field` to the identity index of the referenced table.
    pub fn bind(&mut self, field: impl Into<String>, table: impl Into<TableName>, index: SharedIndex) {
        self.bindings.push(Binding {
            field: field.into(),
            table: table.into(),
            index: Some(index),
        });
    }

    /// Bind `field` to a table that keeps no local copy; its values pass
    /// through untouched.
    pub fn bind_remote(&mut self, field: impl Into<String>, table: impl Into<TableName>) {
        self.bindings.push(Binding {
            field: field.into(),
            table: table.into(),
            index: None,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Return a copy of `attributes` with every non-null key field
    /// translated in `direction`.
    pub fn remap(&self, attributes: &Attributes, direction: Direction) -> Result<Attributes> {
        let mut out = attributes.clone();
        for binding in &self.bindings {
            let Some(index) = &binding.index else {
                continue;
            };
            let Some(value) = attributes.get(&binding.field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let index = index.read();
            let mapped = match direction {
                Direction::ToServer => to_server(binding, &index, value)?,
                Direction::ToLocal => to_local(binding, &index, value)?,
            };
            out.insert(binding.field.clone(), mapped);
        }
        Ok(out)
    }
}

fn to_server(
    binding: &Binding,
    index: &IdentityIndex,
    value: &serde_json::Value,
) -> Result<serde_json::Value> {
    let local_id = match value {
        serde_json::Value::String(s) => s.as_str(),
        other => return Err(resolution_error(binding, other)),
    };
    match index.server_id(local_id) {
        Some(Some(sid)) => Ok(sid.to_value()),
        Some(None) => Err(Error::UnresolvedDependency {
            field: binding.field.clone(),
            table: binding.table.clone(),
            local_id: local_id.to_string(),
        }),
        None => Err(resolution_error(binding, value)),
    }
}

fn to_local(
    binding: &Binding,
    index: &IdentityIndex,
    value: &serde_json::Value,
) -> Result<serde_json::Value> {
    let local = ServerId::from_value(value)
        .and_then(|sid| index.local_id(&sid).cloned())
        .ok_or_else(|| resolution_error(binding, value))?;
    Ok(serde_json::Value::String(local))
}

fn resolution_error(binding: &Binding, value: &serde_json::Value) -> Error {
    Error::KeyResolution {
        field: binding.field.clone(),
        table: binding.table.clone(),
        id: match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    fn authors() -> SharedIndex {
        let mut index = IdentityIndex::new();
        index.insert("cid-ann", Some(&ServerId::from(7)));
        index.insert("cid-bob", None);
        Arc::new(RwLock::new(index))
    }

    fn remapper(index: SharedIndex) -> KeyRemapper {
        let mut remapper = KeyRemapper::new();
        remapper.bind("author_id", "authors", index);
        remapper
    }

    #[test]
    fn local_to_server_and_back() {
        let remapper = remapper(authors());

        let local = attrs(json!({"title": "Dune", "author_id": "cid-ann"}));
        let wire = remapper.remap(&local, Direction::ToServer).unwrap();
        assert_eq!(wire["author_id"], json!(7));
        assert_eq!(wire["title"], "Dune");
        assert_eq!(local["author_id"], "cid-ann");

        let back = remapper.remap(&wire, Direction::ToLocal).unwrap();
        assert_eq!(back, local);
    }

    #[test]
    fn unpushed_reference_is_unresolved() {
        let remapper = remapper(authors());
        let err = remapper
            .remap(&attrs(json!({"author_id": "cid-bob"})), Direction::ToServer)
            .unwrap_err();
        assert_eq!(
            err,
            Error::UnresolvedDependency {
                field: "author_id".into(),
                table: "authors".into(),
                local_id: "cid-bob".into(),
            }
        );
    }

    #[test]
    fn unknown_references_fail_resolution() {
        let remapper = remapper(authors());
        let err = remapper
            .remap(&attrs(json!({"author_id": "cid-nobody"})), Direction::ToServer)
            .unwrap_err();
        assert!(matches!(err, Error::KeyResolution { id, .. } if id == "cid-nobody"));

        let err = remapper
            .remap(&attrs(json!({"author_id": 99})), Direction::ToLocal)
            .unwrap_err();
        assert!(matches!(err, Error::KeyResolution { id, .. } if id == "99"));
    }

    #[test]
    fn null_and_missing_keys_are_left_alone() {
        let remapper = remapper(authors());
        let input = attrs(json!({"author_id": null, "title": "x"}));
        assert_eq!(remapper.remap(&input, Direction::ToServer).unwrap(), input);
        let input = attrs(json!({"title": "x"}));
        assert_eq!(remapper.remap(&input, Direction::ToLocal).unwrap(), input);
    }

    #[test]
    fn remote_only_targets_pass_through() {
        let mut remapper = KeyRemapper::new();
        remapper.bind_remote("genre_id", "genres");
        let input = attrs(json!({"genre_id": 3}));
        assert_eq!(remapper.remap(&input, Direction::ToLocal).unwrap(), input);
    }

    #[test]
    fn sees_identities_bound_later() {
        let index = authors();
        let remapper = remapper(index.clone());
        index.write().insert("cid-bob", Some(&ServerId::from(8)));

        let wire = remapper
            .remap(&attrs(json!({"author_id": "cid-bob"})), Direction::ToServer)
            .unwrap();
        assert_eq!(wire["author_id"], json!(8));
    }
}
