//! PostgreSQL pool and migrations.

use sqlx::postgres::{PgPoolOptions, PgPool};
use std::time::Duration;

pub type Pool = PgPool;

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

fn options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
}

/// Connect eagerly; fails if the database is unreachable.
pub async fn create_pool(database_url: &str) -> Result<Pool, sqlx::Error> {
    options().connect(database_url).await
}

/// Build a pool that opens connections on first use.
pub fn create_lazy_pool(database_url: &str) -> Result<Pool, sqlx::Error> {
    options().connect_lazy(database_url)
}

/// Apply the `records` schema.
pub async fn run_migrations(pool: &Pool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
