//! Liveness endpoints.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Whether `/tables` requests need a bearer token
    pub auth_required: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        auth_required: state.config.auth_secret.is_some(),
    })
}

async fn root() -> String {
    format!("Stash Record Server {}", env!("CARGO_PKG_VERSION"))
}
