//! Database bootstrap: embedded migrations and pool construction.

pub mod migrator;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::state::StateStoreError;

/// Default connection pool size when configuration does not say otherwise
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Connect a pool to `database_url`
pub async fn connect_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, StateStoreError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| StateStoreError::from_sqlx("connect", e))
}

/// Run the embedded migrations (idempotent)
pub async fn run_migrations(pool: &PgPool) -> Result<(), StateStoreError> {
    migrator::MIGRATOR
        .run(pool)
        .await
        .map_err(|e| StateStoreError::Permanent(format!("migration failed: {e}")))
}
