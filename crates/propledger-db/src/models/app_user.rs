//! User read model (operational store).
//!
//! Only the fields the ledgers denormalize are read; the user domain
//! itself lives in the operational platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A user (property owner) as read from the operational store.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OperationalUser {
    pub id: Uuid,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OperationalUser {
    /// Find a user by ID.
    pub async fn find_by_id(pool: &sqlx::PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM users WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Check whether a user still exists.
    pub async fn exists(pool: &sqlx::PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)
            ",
        )
        .bind(id)
        .fetch_one(pool)
        .await
    }

    /// Users whose `updated_at` falls within a polling window.
    pub async fn list_updated_between(
        pool: &sqlx::PgPool,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM users
            WHERE updated_at > $1 AND updated_at <= $2
            ORDER BY updated_at ASC
            ",
        )
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await
    }
}
