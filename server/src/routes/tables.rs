//! Record collection routes.

use axum::{routing::get, Router};

use crate::handlers;
use crate::AppState;

/// Create record routes under `/tables`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/tables/{table}",
            get(handlers::list).post(handlers::create),
        )
        .route(
            "/tables/{table}/{id}",
            get(handlers::show)
                .put(handlers::replace)
                .delete(handlers::remove),
        )
}
