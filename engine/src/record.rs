//! Record types for storing data.

use crate::clock::{format_timestamp, parse_timestamp};
use crate::id::{generate_local_id, ServerId};
use crate::{Attributes, LocalId, Timestamp};
use serde::{Deserialize, Serialize};

/// A record in a local table.
///
/// `attributes` never contains the identity attribute; identities live in
/// `local_id` and `server_id`. Key fields inside `attributes` always hold
/// local ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Stable local identifier
    pub local_id: LocalId,
    /// Identifier on the server, once the server has accepted the record
    pub server_id: Option<ServerId>,
    /// Attribute payload (JSON object)
    pub attributes: Attributes,
    /// Local mutation not yet confirmed pushed
    pub dirty: bool,
    /// Tombstone: deleted locally, deletion not yet flushed
    pub deleted: bool,
    /// Last mutation time (milliseconds since epoch)
    pub updated_at: Timestamp,
}

impl Record {
    /// Create a new record with a fresh local id.
    pub fn new(attributes: Attributes, updated_at: Timestamp) -> Self {
        Self {
            local_id: generate_local_id(),
            server_id: None,
            attributes,
            dirty: false,
            deleted: false,
            updated_at,
        }
    }

    /// Bind a server identity.
    pub fn with_server_id(mut self, server_id: ServerId) -> Self {
        self.server_id = Some(server_id);
        self
    }

    /// Check if record is active (not deleted).
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Whether the server has never confirmed this record.
    pub fn is_local_only(&self) -> bool {
        self.server_id.is_none()
    }

    /// Whether a push should upload this record.
    pub fn needs_push(&self) -> bool {
        self.is_active() && (self.dirty || self.is_local_only())
    }

    /// Apply a local edit: replace attributes, stamp, mark dirty.
    pub fn touch(&mut self, attributes: Attributes, timestamp: Timestamp) {
        self.attributes = attributes;
        self.updated_at = timestamp;
        self.dirty = true;
    }

    /// Plain attribute view for the application: attributes plus the local
    /// id under `id_attribute`.
    pub fn to_json(&self, id_attribute: &str) -> serde_json::Value {
        let mut attrs = self.attributes.clone();
        attrs.insert(
            id_attribute.to_string(),
            serde_json::Value::String(self.local_id.clone()),
        );
        serde_json::Value::Object(attrs)
    }
}

/// Remote view of a record as it arrives from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub server_id: ServerId,
    pub updated_at: Timestamp,
    /// Attributes without the identity attribute, key fields still in
    /// server space
    pub attributes: Attributes,
}

impl RemoteRecord {
    /// Split a wire object into identity, timestamp and attributes.
    pub fn from_wire(
        value: serde_json::Value,
        id_attribute: &str,
        updated_at_attribute: &str,
    ) -> crate::Result<Self> {
        let serde_json::Value::Object(mut attributes) = value else {
            return Err(crate::Error::InvalidRecord(
                "remote record must be an object".into(),
            ));
        };
        let server_id = attributes
            .remove(id_attribute)
            .as_ref()
            .and_then(ServerId::from_value)
            .ok_or_else(|| {
                crate::Error::InvalidRecord(format!(
                    "remote record has no '{id_attribute}' attribute"
                ))
            })?;
        let updated_at = parse_timestamp(attributes.get(updated_at_attribute));
        Ok(Self {
            server_id,
            updated_at,
            attributes,
        })
    }
}

/// Build the wire body for a record: attributes (already remapped to server
/// space), the timestamp and, when known, the server identity.
pub fn to_wire(
    mut attributes: Attributes,
    server_id: Option<&ServerId>,
    updated_at: Timestamp,
    id_attribute: &str,
    updated_at_attribute: &str,
) -> serde_json::Value {
    attributes.remove(id_attribute);
    attributes.insert(
        updated_at_attribute.to_string(),
        serde_json::Value::String(format_timestamp(updated_at)),
    );
    if let Some(sid) = server_id {
        attributes.insert(id_attribute.to_string(), sid.to_value());
    }
    serde_json::Value::Object(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn create_record() {
        let record = Record::new(attrs(json!({"name": "Alice"})), 1000);

        assert!(crate::is_local_id(&record.local_id));
        assert!(record.server_id.is_none());
        assert!(!record.dirty);
        assert!(!record.deleted);
        assert!(record.is_active());
        assert!(record.is_local_only());
        assert!(record.needs_push());
    }

    #[test]
    fn touch_marks_dirty() {
        let mut record =
            Record::new(attrs(json!({"name": "Alice"})), 1000).with_server_id(ServerId::from(1));
        assert!(!record.needs_push());

        record.touch(attrs(json!({"name": "Alice Smith"})), 2000);
        assert!(record.dirty);
        assert_eq!(record.updated_at, 2000);
        assert_eq!(record.attributes["name"], "Alice Smith");
        assert!(record.needs_push());
    }

    #[test]
    fn tombstones_are_not_pushed_as_updates() {
        let mut record = Record::new(attrs(json!({})), 1000).with_server_id(ServerId::from(1));
        record.dirty = true;
        record.deleted = true;
        assert!(!record.needs_push());
    }

    #[test]
    fn json_view_uses_local_id() {
        let record = Record::new(attrs(json!({"name": "Alice"})), 1000)
            .with_server_id(ServerId::from(5));
        let view = record.to_json("id");
        assert_eq!(view["id"], json!(record.local_id));
        assert_eq!(view["name"], "Alice");
    }

    #[test]
    fn remote_record_from_wire() {
        let remote = RemoteRecord::from_wire(
            json!({"id": 20, "name": 1, "updated_at": "2024-02-01T00:00:00.000Z"}),
            "id",
            "updated_at",
        )
        .unwrap();
        assert_eq!(remote.server_id, ServerId::from(20));
        assert_eq!(remote.updated_at, 1_706_745_600_000);
        assert!(!remote.attributes.contains_key("id"));
        assert_eq!(remote.attributes["name"], 1);
    }

    #[test]
    fn remote_record_without_id_is_invalid() {
        let result = RemoteRecord::from_wire(json!({"name": 1}), "id", "updated_at");
        assert!(matches!(result, Err(crate::Error::InvalidRecord(_))));

        let result = RemoteRecord::from_wire(json!([1, 2]), "id", "updated_at");
        assert!(matches!(result, Err(crate::Error::InvalidRecord(_))));
    }

    #[test]
    fn wire_body_carries_identity_and_timestamp() {
        let body = to_wire(
            attrs(json!({"name": "x", "id": "cid-stale"})),
            Some(&ServerId::from(9)),
            1_706_745_600_000,
            "id",
            "updated_at",
        );
        assert_eq!(
            body,
            json!({"name": "x", "id": 9, "updated_at": "2024-02-01T00:00:00.000Z"})
        );

        let body = to_wire(attrs(json!({"name": "x"})), None, 0, "id", "updated_at");
        assert!(body.get("id").is_none());
    }

    #[test]
    fn serialization_roundtrip() {
        let record = Record::new(attrs(json!({"name": "Alice", "age": 30})), 1000);
        let json = serde_json::to_string(&record).unwrap();
        let parsed: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
    }
}
