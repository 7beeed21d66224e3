//! REST handlers over the records table.
//!
//! `GET /tables/{table}` lists, `POST /tables/{table}` creates,
//! `GET|PUT|DELETE /tables/{table}/{id}` act on one record.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::auth::AuthUser;
use crate::db;
use crate::error::{AppError, Result};
use crate::AppState;

const MAX_TABLE_NAME: usize = 64;

/// Table names are path segments and partition keys; keep them plain.
pub fn validate_table_name(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && table.len() <= MAX_TABLE_NAME
        && table
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("invalid table name '{table}'")))
    }
}

/// Server ids are integers; anything else cannot exist.
fn parse_id(table: &str, id: &str) -> Result<i64> {
    id.parse()
        .map_err(|_| AppError::NotFound(format!("{table}/{id}")))
}

/// Strip the identity from a request body.
fn attributes(body: serde_json::Value) -> Result<serde_json::Value> {
    match body {
        serde_json::Value::Object(mut map) => {
            map.remove("id");
            Ok(serde_json::Value::Object(map))
        }
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

/// List every record of a table.
pub async fn list(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<Json<Vec<serde_json::Value>>> {
    validate_table_name(&table)?;
    let records = db::list_records(&state.pool, &table).await?;
    tracing::debug!(table = %table, count = records.len(), "Listed records");
    Ok(Json(records.into_iter().map(|r| r.into_json()).collect()))
}

/// Create a record; the server assigns the id.
pub async fn create(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(table): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    validate_table_name(&table)?;
    let attributes = attributes(body)?;
    let record = db::insert_record(&state.pool, &table, &attributes).await?;
    tracing::info!(table = %table, id = record.id, "Created record");
    Ok((StatusCode::CREATED, Json(record.into_json())))
}

/// Fetch one record.
pub async fn show(
    _user: AuthUser,
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>> {
    validate_table_name(&table)?;
    let record_id = parse_id(&table, &id)?;
    let record = db::get_record(&state.pool, &table, record_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{table}/{id}")))?;
    Ok(Json(record.into_json()))
}

/// Replace a record's attributes.
pub async fn replace(
    _user: AuthUser,
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>> {
    validate_table_name(&table)?;
    let record_id = parse_id(&table, &id)?;
    let attributes = attributes(body)?;
    let record = db::update_record(&state.pool, &table, record_id, &attributes)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{table}/{id}")))?;
    tracing::info!(table = %table, id = record.id, "Updated record");
    Ok(Json(record.into_json()))
}

/// Delete a record.
pub async fn remove(
    _user: AuthUser,
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    validate_table_name(&table)?;
    let record_id = parse_id(&table, &id)?;
    if !db::delete_record(&state.pool, &table, record_id).await? {
        return Err(AppError::NotFound(format!("{table}/{id}")));
    }
    tracing::info!(table = %table, id = record_id, "Deleted record");
    Ok(StatusCode::NO_CONTENT)
}
