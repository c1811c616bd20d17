//! Connection pool construction for the two stores.
//!
//! The operational store and the ledger store are separate PostgreSQL
//! databases with no shared transaction boundary; each gets its own pool.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::DbError;

/// Default maximum connections per pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default pool acquire timeout in seconds.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Connect a pool with the platform defaults.
pub async fn connect(database_url: &str) -> Result<PgPool, DbError> {
    connect_with(database_url, DEFAULT_MAX_CONNECTIONS).await
}

/// Connect a pool with an explicit connection cap.
pub async fn connect_with(database_url: &str, max_connections: u32) -> Result<PgPool, DbError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS))
        .connect(database_url)
        .await
        .map_err(DbError::ConnectionFailed)
}
