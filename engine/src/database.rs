//! Application entry point: a set of synchronized tables.

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::id::ServerId;
use crate::operation::{Method, Reply, Subject, SyncOptions};
use crate::reconcile::SyncReport;
use crate::remap::KeyRemapper;
use crate::schema::{Schema, TableSchema};
use crate::store::StorageBackend;
use crate::table::{SyncContext, Table};
use crate::transport::{AlwaysOnline, Connectivity, Transport, TransportRequest};
use crate::{error::Result, Error, TableName};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Builder for [`Database`].
pub struct DatabaseBuilder {
    backend: Arc<dyn StorageBackend>,
    transport: Arc<dyn Transport>,
    connectivity: Arc<dyn Connectivity>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    schema: Schema,
}

impl DatabaseBuilder {
    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Declare a table.
    pub fn table(mut self, table: TableSchema) -> Self {
        self.schema.add_table(table);
        self
    }

    /// Validate the schema and open every table, referenced tables first.
    pub async fn build(self) -> Result<Database> {
        self.schema.validate()?;
        let order = self.schema.dependency_order()?;

        let context = Arc::new(SyncContext {
            backend: Arc::clone(&self.backend),
            transport: self.transport,
            connectivity: self.connectivity,
            clock: self.clock,
            config: self.config,
        });

        let mut tables: HashMap<TableName, Arc<Table>> = HashMap::new();
        let mut depth: HashMap<TableName, usize> = HashMap::new();
        for name in &order {
            let schema = self
                .schema
                .get_table(name)
                .cloned()
                .ok_or_else(|| Error::TableNotFound(name.clone()))?;

            let mut remapper = KeyRemapper::new();
            let mut level = 0;
            for key in &schema.keys {
                let target = tables
                    .get(&key.table)
                    .ok_or_else(|| Error::TableNotFound(key.table.clone()))?;
                if target.is_stored() {
                    remapper.bind(&key.field, &key.table, Arc::clone(&target.index));
                } else {
                    remapper.bind_remote(&key.field, &key.table);
                }
                level = level.max(depth.get(&key.table).copied().unwrap_or(0) + 1);
            }
            depth.insert(name.clone(), level);

            let mut levels: Vec<Vec<Arc<Table>>> = Vec::new();
            for dep in self.schema.all_dependencies(name)? {
                let d = depth.get(&dep).copied().unwrap_or(0);
                if levels.len() <= d {
                    levels.resize_with(d + 1, Vec::new);
                }
                if let Some(table) = tables.get(&dep) {
                    levels[d].push(Arc::clone(table));
                }
            }
            levels.retain(|l| !l.is_empty());

            let store = self.backend.open(name).await?;
            let table = Table::open(schema, store, remapper, levels, Arc::clone(&context)).await?;
            tables.insert(name.clone(), Arc::new(table));
        }

        info!(tables = order.len(), "Database ready");
        Ok(Database {
            schema: self.schema,
            tables,
            order,
        })
    }
}

/// A set of synchronized tables sharing one storage backend, one transport
/// and one connectivity signal.
pub struct Database {
    schema: Schema,
    tables: HashMap<TableName, Arc<Table>>,
    order: Vec<TableName>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("tables", &self.order)
            .finish()
    }
}

impl Database {
    pub fn builder(backend: Arc<dyn StorageBackend>, transport: Arc<dyn Transport>) -> DatabaseBuilder {
        DatabaseBuilder {
            backend,
            transport,
            connectivity: Arc::new(AlwaysOnline),
            clock: Arc::new(SystemClock),
            config: SyncConfig::default(),
            schema: Schema::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Table names, referenced tables first.
    pub fn table_names(&self) -> &[TableName] {
        &self.order
    }

    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Run one operation. Stored tables are served from local storage;
    /// remote-only tables go straight to the transport.
    pub async fn dispatch(
        &self,
        method: Method,
        subject: Subject,
        options: SyncOptions,
    ) -> Result<Reply> {
        let table = self.table(subject.table())?;
        if table.is_stored() {
            dispatch_local(&table, method, subject, options).await
        } else {
            dispatch_remote(&table, method, subject).await
        }
    }

    /// Incremental sync of every stored table, referenced tables first.
    /// Tables at the same depth run concurrently.
    pub async fn sync_all(&self) -> Vec<(TableName, Result<SyncReport>)> {
        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut levels: Vec<Vec<&Arc<Table>>> = Vec::new();
        for name in &self.order {
            let Some(table) = self.tables.get(name) else {
                continue;
            };
            let d = table
                .schema()
                .keys
                .iter()
                .map(|k| depth.get(k.table.as_str()).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depth.insert(name.as_str(), d);
            if table.is_stored() {
                if levels.len() <= d {
                    levels.resize_with(d + 1, Vec::new);
                }
                levels[d].push(table);
            }
        }

        let mut results = Vec::new();
        for level in levels {
            let outcomes = join_all(
                level
                    .iter()
                    .map(|t| t.incremental(SyncOptions::new().ignore_dependencies())),
            )
            .await;
            for (table, outcome) in level.iter().zip(outcomes) {
                results.push((table.name().clone(), outcome));
            }
        }
        results
    }
}

fn missing_id(method: Method, table: &str) -> Error {
    Error::InvalidRecord(format!("{method} on '{table}' needs a record id"))
}

async fn dispatch_local(
    table: &Arc<Table>,
    method: Method,
    subject: Subject,
    options: SyncOptions,
) -> Result<Reply> {
    match (method, subject) {
        (Method::Read, Subject::Collection(_)) => {
            let records = table.find_all(options).await?;
            Ok(Reply::Records(records.iter().map(|r| table.view(r)).collect()))
        }
        (Method::Read, Subject::Record { id: Some(id), .. }) => {
            let record = table.find(&id).await?;
            Ok(Reply::Record(table.view(&record)))
        }
        (Method::Create, Subject::Record { attributes, .. }) => {
            let record = table.create(attributes, options).await?;
            Ok(Reply::Record(table.view(&record)))
        }
        (Method::Update, Subject::Record { id: Some(id), attributes, .. }) => {
            let record = table.update(&id, attributes, options).await?;
            Ok(Reply::Record(table.view(&record)))
        }
        (Method::Delete, Subject::Record { id: Some(id), .. }) => {
            table.destroy(&id, options).await?;
            Ok(Reply::Removed)
        }
        (method, _) => Err(missing_id(method, table.name())),
    }
}

async fn dispatch_remote(table: &Arc<Table>, method: Method, subject: Subject) -> Result<Reply> {
    let name = table.name().clone();
    match (method, subject) {
        (Method::Read, Subject::Collection(_)) => {
            match table.send(TransportRequest::read_all(name)).await? {
                serde_json::Value::Array(items) => Ok(Reply::Records(items)),
                serde_json::Value::Null => Ok(Reply::Records(Vec::new())),
                other => Ok(Reply::Records(vec![other])),
            }
        }
        (Method::Read, Subject::Record { id: Some(id), .. }) => {
            let response = table.send(TransportRequest::read(name, ServerId::new(id))).await?;
            Ok(Reply::Record(response))
        }
        (Method::Create, Subject::Record { attributes, .. }) => {
            let body = serde_json::Value::Object(attributes);
            Ok(Reply::Record(table.send(TransportRequest::create(name, body)).await?))
        }
        (Method::Update, Subject::Record { id: Some(id), attributes, .. }) => {
            let body = serde_json::Value::Object(attributes);
            let request = TransportRequest::update(name, ServerId::new(id), body);
            Ok(Reply::Record(table.send(request).await?))
        }
        (Method::Delete, Subject::Record { id: Some(id), .. }) => {
            table.send(TransportRequest::delete(name, ServerId::new(id))).await?;
            Ok(Reply::Removed)
        }
        (method, _) => Err(missing_id(method, &name)),
    }
}
