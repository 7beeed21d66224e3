//! In-memory remote for tests and demos.

use super::{Transport, TransportRequest};
use crate::{error::Result, Attributes, Error, Method};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    tables: HashMap<String, BTreeMap<i64, Attributes>>,
    next_id: i64,
    requests: Vec<TransportRequest>,
    failures: HashMap<Method, Error>,
    latency: Option<Duration>,
}

/// A fake server: integer ids handed out sequentially, every request
/// logged, failures injectable per method.
#[derive(Debug)]
pub struct MockTransport {
    id_attribute: String,
    state: Mutex<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a new mock remote with no tables.
    pub fn new() -> Self {
        Self {
            id_attribute: "id".to_string(),
            state: Mutex::new(MockState {
                next_id: 1,
                ..MockState::default()
            }),
        }
    }

    /// Replace the contents of a remote table. Each value must be an object
    /// with an integer id.
    pub fn set_records(&self, table: &str, records: Vec<serde_json::Value>) {
        let mut state = self.state.lock();
        let mut rows = BTreeMap::new();
        for value in records {
            let Some(attrs) = value.as_object().cloned() else {
                continue;
            };
            let Some(id) = attrs.get(&self.id_attribute).and_then(|v| v.as_i64()) else {
                continue;
            };
            state.next_id = state.next_id.max(id + 1);
            rows.insert(id, attrs);
        }
        state.tables.insert(table.to_string(), rows);
    }

    /// Add one record on the server side, returning its id.
    pub fn insert(&self, table: &str, mut attrs: Attributes) -> i64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        attrs.insert(self.id_attribute.clone(), id.into());
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, attrs);
        id
    }

    /// Delete a record on the server side.
    pub fn remove(&self, table: &str, id: i64) -> bool {
        self.state
            .lock()
            .tables
            .get_mut(table)
            .map(|rows| rows.remove(&id).is_some())
            .unwrap_or(false)
    }

    /// Current server-side records of a table, ordered by id.
    pub fn records(&self, table: &str) -> Vec<Attributes> {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Server-side record by id.
    pub fn record(&self, table: &str, id: i64) -> Option<Attributes> {
        self.state
            .lock()
            .tables
            .get(table)
            .and_then(|rows| rows.get(&id).cloned())
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of requests received for a method on a table.
    pub fn request_count(&self, method: Method, table: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.method == method && r.table == table)
            .count()
    }

    /// Forget the request log.
    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Make every request of `method` fail with `error`.
    pub fn fail(&self, method: Method, error: Error) {
        self.state.lock().failures.insert(method, error);
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Delay every response.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    fn handle(&self, request: &TransportRequest) -> Result<serde_json::Value> {
        let mut state = self.state.lock();
        state.requests.push(request.clone());
        if let Some(err) = state.failures.get(&request.method) {
            return Err(err.clone());
        }

        let id = match &request.server_id {
            Some(sid) => Some(sid.as_str().parse::<i64>().map_err(|_| {
                Error::NotFound(request.target())
            })?),
            None => None,
        };

        match (request.method, id) {
            (Method::Read, None) => {
                let rows = state
                    .tables
                    .get(&request.table)
                    .map(|rows| rows.values().cloned().map(serde_json::Value::Object).collect())
                    .unwrap_or_default();
                Ok(serde_json::Value::Array(rows))
            }
            (Method::Read, Some(id)) => state
                .tables
                .get(&request.table)
                .and_then(|rows| rows.get(&id))
                .cloned()
                .map(serde_json::Value::Object)
                .ok_or_else(|| Error::NotFound(request.target())),
            (Method::Create, _) => {
                let mut attrs = body_object(request)?;
                let id = state.next_id;
                state.next_id += 1;
                attrs.insert(self.id_attribute.clone(), id.into());
                state
                    .tables
                    .entry(request.table.clone())
                    .or_default()
                    .insert(id, attrs.clone());
                Ok(serde_json::Value::Object(attrs))
            }
            (Method::Update, Some(id)) => {
                let mut attrs = body_object(request)?;
                attrs.insert(self.id_attribute.clone(), id.into());
                let row = state
                    .tables
                    .get_mut(&request.table)
                    .and_then(|rows| rows.get_mut(&id))
                    .ok_or_else(|| Error::NotFound(request.target()))?;
                *row = attrs.clone();
                Ok(serde_json::Value::Object(attrs))
            }
            (Method::Delete, Some(id)) => state
                .tables
                .get_mut(&request.table)
                .and_then(|rows| rows.remove(&id))
                .map(|_| serde_json::Value::Null)
                .ok_or_else(|| Error::NotFound(request.target())),
            (method, None) => Err(Error::Transport {
                status: Some(405),
                reason: format!("{method} needs a record target"),
            }),
        }
    }
}

fn body_object(request: &TransportRequest) -> Result<Attributes> {
    request
        .body
        .as_ref()
        .and_then(|b| b.as_object())
        .cloned()
        .ok_or_else(|| Error::Transport {
            status: Some(400),
            reason: "body must be an object".into(),
        })
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<serde_json::Value> {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.handle(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ServerId;
    use serde_json::json;

    #[tokio::test]
    async fn crud_against_the_fake_server() {
        let remote = MockTransport::new();
        remote.set_records("t", vec![json!({"id": 20, "name": 1})]);

        let created = remote
            .send(TransportRequest::create("t", json!({"name": 2})))
            .await
            .unwrap();
        assert_eq!(created["id"], 21);

        let all = remote.send(TransportRequest::read_all("t")).await.unwrap();
        assert_eq!(all.as_array().unwrap().len(), 2);

        remote
            .send(TransportRequest::update("t", ServerId::from(21), json!({"name": 3})))
            .await
            .unwrap();
        assert_eq!(remote.record("t", 21).unwrap()["name"], 3);

        remote
            .send(TransportRequest::delete("t", ServerId::from(20)))
            .await
            .unwrap();
        assert_eq!(remote.records("t").len(), 1);
        assert_eq!(remote.request_count(Method::Read, "t"), 1);
    }

    #[tokio::test]
    async fn missing_targets_are_not_found() {
        let remote = MockTransport::new();
        let err = remote
            .send(TransportRequest::delete("t", ServerId::from(1)))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = remote
            .send(TransportRequest::update("t", ServerId::new("abc"), json!({})))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn injected_failures() {
        let remote = MockTransport::new();
        remote.fail(
            Method::Read,
            Error::Transport {
                status: Some(500),
                reason: "boom".into(),
            },
        );
        assert!(remote.send(TransportRequest::read_all("t")).await.is_err());
        remote.clear_failures();
        assert!(remote.send(TransportRequest::read_all("t")).await.is_ok());
        assert_eq!(remote.requests().len(), 2);
    }
}
