//! Database operations for the records table.

use sqlx::{PgPool, Row};

/// A stored record row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub attributes: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            id: row.try_get("id")?,
            attributes: row.try_get("attributes")?,
        })
    }
}

impl StoredRecord {
    /// Wire form: the stored attributes plus the id.
    pub fn into_json(self) -> serde_json::Value {
        let mut attributes = match self.attributes {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        attributes.insert("id".to_string(), self.id.into());
        serde_json::Value::Object(attributes)
    }
}

/// All records of a table, oldest first.
pub async fn list_records(pool: &PgPool, table: &str) -> Result<Vec<StoredRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT id, attributes
        FROM records
        WHERE table_name = $1
        ORDER BY id
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
}

/// Get a record by table and id.
pub async fn get_record(
    pool: &PgPool,
    table: &str,
    id: i64,
) -> Result<Option<StoredRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT id, attributes
        FROM records
        WHERE table_name = $1 AND id = $2
        "#,
    )
    .bind(table)
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Insert a record, letting the database assign its id.
pub async fn insert_record(
    pool: &PgPool,
    table: &str,
    attributes: &serde_json::Value,
) -> Result<StoredRecord, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        INSERT INTO records (table_name, attributes)
        VALUES ($1, $2)
        RETURNING id, attributes
        "#,
    )
    .bind(table)
    .bind(attributes)
    .fetch_one(pool)
    .await
}

/// Replace the attributes of an existing record.
pub async fn update_record(
    pool: &PgPool,
    table: &str,
    id: i64,
    attributes: &serde_json::Value,
) -> Result<Option<StoredRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        UPDATE records
        SET attributes = $3, modified_at = now()
        WHERE table_name = $1 AND id = $2
        RETURNING id, attributes
        "#,
    )
    .bind(table)
    .bind(id)
    .bind(attributes)
    .fetch_optional(pool)
    .await
}

/// Delete a record. Returns false when it did not exist.
pub async fn delete_record(pool: &PgPool, table: &str, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM records WHERE table_name = $1 AND id = $2")
        .bind(table)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
