//! SQLite storage backend.
//!
//! One [`SqlitePool`] is the physical connection; each table gets its own SQL
//! table with the attribute payload stored as a JSON text blob.

use super::{RecordStore, StorageBackend};
use crate::id::ServerId;
use crate::{error::Result, Error, Record};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

/// A stored row from a table.
#[derive(Debug)]
struct StoredRecord {
    local_id: String,
    sid: Option<String>,
    dirty: bool,
    deleted: bool,
    updated_at: i64,
    attributes: String,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredRecord {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            local_id: row.try_get("local_id")?,
            sid: row.try_get("sid")?,
            dirty: row.try_get("dirty")?,
            deleted: row.try_get("deleted")?,
            updated_at: row.try_get("updated_at")?,
            attributes: row.try_get("attributes")?,
        })
    }
}

impl StoredRecord {
    /// Convert database row to an engine Record.
    fn into_record(self) -> Result<Record> {
        let attributes = serde_json::from_str(&self.attributes)?;
        Ok(Record {
            local_id: self.local_id,
            server_id: self.sid.map(ServerId::new),
            attributes,
            dirty: self.dirty,
            deleted: self.deleted,
            updated_at: self.updated_at.max(0) as u64,
        })
    }
}

const COLUMNS: &str = "local_id, sid, dirty, deleted, updated_at, attributes";

/// Table names are spliced into SQL; keep them plain identifiers.
fn check_table_name(table: &str) -> Result<()> {
    if table.is_empty()
        || !table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::Storage(format!("invalid table name: {table:?}")));
    }
    Ok(())
}

/// Records of one table in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteStore {
    /// Open the store for `table`, creating the SQL table if needed.
    pub async fn open(pool: SqlitePool, table: &str) -> Result<Self> {
        check_table_name(table)?;

        let create = format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                local_id TEXT PRIMARY KEY,
                sid TEXT,
                dirty INTEGER NOT NULL,
                deleted INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                attributes TEXT NOT NULL
            )
            "#
        );
        sqlx::query(&create).execute(&pool).await?;

        let index = format!(r#"CREATE INDEX IF NOT EXISTS "{table}_sid" ON "{table}" (sid)"#);
        sqlx::query(&index).execute(&pool).await?;

        tracing::debug!(table = %table, "Opened SQLite table");

        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    async fn fetch_where(&self, clause: &str, deleted: Option<bool>) -> Result<Vec<Record>> {
        let sql = format!(
            r#"SELECT {COLUMNS} FROM "{}" {clause} ORDER BY updated_at ASC, local_id ASC"#,
            self.table
        );
        let mut query = sqlx::query_as::<_, StoredRecord>(&sql);
        if let Some(deleted) = deleted {
            query = query.bind(deleted);
        }
        query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(StoredRecord::into_record)
            .collect()
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get(&self, local_id: &str) -> Result<Option<Record>> {
        let sql = format!(
            r#"SELECT {COLUMNS} FROM "{}" WHERE local_id = ?"#,
            self.table
        );
        sqlx::query_as::<_, StoredRecord>(&sql)
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?
            .map(StoredRecord::into_record)
            .transpose()
    }

    async fn put(&self, record: &Record) -> Result<()> {
        let sql = format!(
            r#"INSERT OR REPLACE INTO "{}" ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"#,
            self.table
        );
        let attributes = serde_json::to_string(&record.attributes)?;
        let updated_at = i64::try_from(record.updated_at).map_err(|_| {
            Error::InvalidRecord(format!(
                "updated_at {} of {} is out of range",
                record.updated_at, record.local_id
            ))
        })?;
        sqlx::query(&sql)
            .bind(&record.local_id)
            .bind(record.server_id.as_ref().map(ServerId::as_str))
            .bind(record.dirty)
            .bind(record.deleted)
            .bind(updated_at)
            .bind(attributes)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn soft_delete(&self, local_id: &str) -> Result<bool> {
        let sql = format!(
            r#"UPDATE "{}" SET deleted = ? WHERE local_id = ?"#,
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(true)
            .bind(local_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn hard_delete(&self, local_id: &str) -> Result<bool> {
        let sql = format!(r#"DELETE FROM "{}" WHERE local_id = ?"#, self.table);
        let result = sqlx::query(&sql)
            .bind(local_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn scan_not_deleted(&self) -> Result<Vec<Record>> {
        self.fetch_where("WHERE deleted = ?", Some(false)).await
    }

    async fn scan_deleted(&self) -> Result<Vec<Record>> {
        self.fetch_where("WHERE deleted = ?", Some(true)).await
    }

    async fn is_empty(&self) -> Result<bool> {
        let sql = format!(r#"SELECT COUNT(*) FROM "{}""#, self.table);
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count == 0)
    }

    async fn clear(&self) -> Result<()> {
        let sql = format!(r#"DELETE FROM "{}""#, self.table);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn find_by_server_id(&self, server_id: &ServerId) -> Result<Option<Record>> {
        let sql = format!(r#"SELECT {COLUMNS} FROM "{}" WHERE sid = ?"#, self.table);
        sqlx::query_as::<_, StoredRecord>(&sql)
            .bind(server_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(StoredRecord::into_record)
            .transpose()
    }
}

/// SQLite database shared by every table of a [`crate::Database`].
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Wrap an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a database file (or any SQLite URL), creating it if missing.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// A private in-memory database. A single connection that is never
    /// recycled keeps the data alive for the lifetime of the backend.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn open(&self, table: &str) -> Result<Arc<dyn RecordStore>> {
        let store = SqliteStore::open(self.pool.clone(), table).await?;
        Ok(Arc::new(store))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<Arc<dyn RecordStore>> {
        check_table_name(from)?;
        check_table_name(to)?;
        if from != to {
            let mut tx = self.pool.begin().await?;
            let existing: Option<(String,)> =
                sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                    .bind(to)
                    .fetch_optional(&mut *tx)
                    .await?;
            if existing.is_some() {
                sqlx::query(&format!(r#"DROP TABLE IF EXISTS "{from}""#))
                    .execute(&mut *tx)
                    .await?;
            } else {
                sqlx::query(&format!(r#"DROP INDEX IF EXISTS "{from}_sid""#))
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(&format!(r#"ALTER TABLE "{from}" RENAME TO "{to}""#))
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            tracing::debug!(from, to, switched = existing.is_some(), "Renamed SQLite table");
        }
        self.open(to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str, updated_at: u64) -> Record {
        Record::new(json!({ "name": name }).as_object().cloned().unwrap(), updated_at)
    }

    #[tokio::test]
    async fn put_and_get_round_trip() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let store = backend.open("books").await.unwrap();

        let mut a = record("Dune", 1000).with_server_id(ServerId::from(20));
        a.dirty = true;
        store.put(&a).await.unwrap();

        assert_eq!(store.get(&a.local_id).await.unwrap(), Some(a.clone()));
        assert_eq!(
            store.find_by_server_id(&ServerId::from(20)).await.unwrap(),
            Some(a)
        );
        assert!(store.get("cid-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tombstones_and_scans() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let store = backend.open("books").await.unwrap();

        let a = record("a", 1);
        let b = record("b", 2);
        store.put(&a).await.unwrap();
        store.put(&b).await.unwrap();
        assert!(store.soft_delete(&a.local_id).await.unwrap());

        let live = store.scan_not_deleted().await.unwrap();
        assert_eq!(live, vec![b.clone()]);
        let dead = store.scan_deleted().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].deleted);

        assert!(store.hard_delete(&a.local_id).await.unwrap());
        assert!(!store.hard_delete(&a.local_id).await.unwrap());
        assert!(!store.is_empty().await.unwrap());

        store.clear().await.unwrap();
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn tables_share_the_connection_but_not_rows() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let books = backend.open("books").await.unwrap();
        let authors = backend.open("authors").await.unwrap();

        books.put(&record("a", 1)).await.unwrap();
        assert!(!books.is_empty().await.unwrap());
        assert!(authors.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn out_of_range_timestamps_are_rejected() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let store = backend.open("books").await.unwrap();
        let result = store.put(&record("far future", u64::MAX)).await;
        assert!(matches!(result, Err(Error::InvalidRecord(_))));
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn rename_keeps_rows() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let books = backend.open("books").await.unwrap();
        let a = record("a", 1).with_server_id(ServerId::from(20));
        books.put(&a).await.unwrap();

        let renamed = backend.rename("books", "books_v2").await.unwrap();
        assert_eq!(renamed.get(&a.local_id).await.unwrap(), Some(a.clone()));
        assert_eq!(
            renamed.find_by_server_id(&ServerId::from(20)).await.unwrap(),
            Some(a)
        );

        // The old name is free again.
        let fresh = backend.open("books").await.unwrap();
        assert!(fresh.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn rename_onto_existing_table_switches_to_it() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let books = backend.open("books").await.unwrap();
        books.put(&record("dropped", 1)).await.unwrap();
        let archive = backend.open("archive").await.unwrap();
        archive.put(&record("kept", 1)).await.unwrap();

        let switched = backend.rename("books", "archive").await.unwrap();
        let rows = switched.scan_not_deleted().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attributes["name"], "kept");

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'books'",
        )
        .fetch_one(backend.pool())
        .await
        .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn rejects_unsafe_table_names() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let result = backend.open("books; DROP TABLE x").await;
        assert!(matches!(result, Err(Error::Storage(_))));
    }
}
