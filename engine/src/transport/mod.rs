//! Transport abstraction and connectivity signal.
//!
//! The engine talks to the remote system only through [`Transport::send`].
//! Before every call it polls a [`Connectivity`] predicate; offline calls are
//! never attempted.

#[cfg(feature = "http")]
mod http;
mod mock;

#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use mock::MockTransport;

use crate::id::ServerId;
use crate::{error::Result, Method, TableName};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One request to the remote system.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    /// Remote collection
    pub table: TableName,
    /// Target record; `None` targets the collection
    pub server_id: Option<ServerId>,
    /// Wire body for creates and updates
    pub body: Option<serde_json::Value>,
}

impl TransportRequest {
    /// Read the whole collection.
    pub fn read_all(table: impl Into<TableName>) -> Self {
        Self {
            method: Method::Read,
            table: table.into(),
            server_id: None,
            body: None,
        }
    }

    /// Read one record.
    pub fn read(table: impl Into<TableName>, id: ServerId) -> Self {
        Self {
            method: Method::Read,
            table: table.into(),
            server_id: Some(id),
            body: None,
        }
    }

    pub fn create(table: impl Into<TableName>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Create,
            table: table.into(),
            server_id: None,
            body: Some(body),
        }
    }

    pub fn update(table: impl Into<TableName>, id: ServerId, body: serde_json::Value) -> Self {
        Self {
            method: Method::Update,
            table: table.into(),
            server_id: Some(id),
            body: Some(body),
        }
    }

    pub fn delete(table: impl Into<TableName>, id: ServerId) -> Self {
        Self {
            method: Method::Delete,
            table: table.into(),
            server_id: Some(id),
            body: None,
        }
    }

    /// Human-readable target, used in errors and logs.
    pub fn target(&self) -> String {
        match &self.server_id {
            Some(id) => format!("{}/{}", self.table, id),
            None => self.table.clone(),
        }
    }
}

/// Sends requests to the remote system.
///
/// A collection `read` resolves to a JSON array of plain attribute objects;
/// every other request resolves to a single object (or `null` for an empty
/// response). A missing target fails with [`crate::Error::NotFound`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<serde_json::Value>;
}

/// Answers whether the device is currently online.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Connectivity that never goes away.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// A shared online/offline flag, flipped by the application (or tests).
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    online: Arc<AtomicBool>,
}

impl NetworkStatus {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for NetworkStatus {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
