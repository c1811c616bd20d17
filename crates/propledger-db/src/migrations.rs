//! Migration runners for both stores.
//!
//! The ledger store owns the engine's persisted state (sync failures,
//! ledger accounts, maintenance jobs). The operational store migrations
//! install only the change-feed trigger function plus, for development
//! and test environments, the operational tables themselves — in
//! production those tables are owned by the operational platform.

use sqlx::PgPool;

use crate::error::DbError;

/// Apply ledger-store migrations.
pub async fn migrate_ledger(pool: &PgPool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations/ledger")
        .run(pool)
        .await
        .map_err(DbError::MigrationFailed)
}

/// Apply operational-store migrations (schema + change-feed triggers).
pub async fn migrate_ops(pool: &PgPool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations/ops")
        .run(pool)
        .await
        .map_err(DbError::MigrationFailed)
}
