//! Property read model (operational store).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A property as read from the operational store.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Property {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub owner_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Property {
    /// Find a property by ID.
    pub async fn find_by_id(pool: &sqlx::PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM properties WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Check whether a property still exists.
    pub async fn exists(pool: &sqlx::PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT EXISTS (SELECT 1 FROM properties WHERE id = $1)
            ",
        )
        .bind(id)
        .fetch_one(pool)
        .await
    }

    /// Properties whose `updated_at` falls within a polling window.
    pub async fn list_updated_between(
        pool: &sqlx::PgPool,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM properties
            WHERE updated_at > $1 AND updated_at <= $2
            ORDER BY updated_at ASC
            ",
        )
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await
    }

    /// All active properties (consistency check: every one must have a ledger).
    pub async fn list_active(pool: &sqlx::PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM properties WHERE is_active ORDER BY created_at ASC
            ",
        )
        .fetch_all(pool)
        .await
    }

    /// Active properties of one company.
    pub async fn list_by_company(
        pool: &sqlx::PgPool,
        company_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM properties
            WHERE company_id = $1 AND is_active
            ORDER BY created_at ASC
            ",
        )
        .bind(company_id)
        .fetch_all(pool)
        .await
    }

    /// Distinct company ids with active properties.
    pub async fn list_company_ids(pool: &sqlx::PgPool) -> Result<Vec<Uuid>, sqlx::Error> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r"
            SELECT DISTINCT company_id FROM properties WHERE is_active
            ",
        )
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
