//! Sync failure ledger model.
//!
//! One pending row per (entity kind, entity id) currently failing to
//! synchronize, with retriability classification and backoff scheduling.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Kind of operational entity a failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Payment,
    Property,
    User,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Payment => write!(f, "payment"),
            EntityKind::Property => write!(f, "property"),
            EntityKind::User => write!(f, "user"),
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "payment" => Ok(EntityKind::Payment),
            "property" => Ok(EntityKind::Property),
            "user" => Ok(EntityKind::User),
            _ => Err(format!("Unknown entity kind: {s}")),
        }
    }
}

/// Failure lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FailureStatus {
    /// Awaiting a retry.
    Pending,
    /// A retry succeeded.
    Resolved,
    /// Exhausted attempts or classified non-retriable.
    Discarded,
}

impl std::fmt::Display for FailureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureStatus::Pending => write!(f, "pending"),
            FailureStatus::Resolved => write!(f, "resolved"),
            FailureStatus::Discarded => write!(f, "discarded"),
        }
    }
}

/// Classified error details recorded with a failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetails {
    pub name: String,
    pub code: Option<String>,
    pub message: String,
    pub labels: Vec<String>,
    pub retriable: bool,
}

/// Default hard ceiling on retry attempts.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 10;

/// Default base backoff in seconds.
pub const DEFAULT_BASE_BACKOFF_SECS: i64 = 60;

/// Backoff ceiling: 24 hours.
pub const MAX_BACKOFF_SECS: i64 = 24 * 60 * 60;

/// Compute the next attempt delay: `min(base × 2^attempts, 24h)`.
#[must_use]
pub fn backoff_delay_secs(base_secs: i64, attempts: i32) -> i64 {
    let shift = attempts.clamp(0, 30) as u32;
    base_secs
        .saturating_mul(1i64 << shift)
        .min(MAX_BACKOFF_SECS)
}

/// A durable per-entity sync failure record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SyncFailure {
    pub id: Uuid,
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub error_name: String,
    pub error_code: Option<String>,
    pub error_message: String,
    pub error_labels: Vec<String>,
    pub retriable: bool,
    pub status: FailureStatus,
    pub attempt_count: i32,
    pub last_error_at: DateTime<Utc>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncFailure {
    /// Record a failed sync attempt for an entity.
    ///
    /// Upserts the single pending row for (kind, id): a new failure starts
    /// at attempt 1; a repeated failure bumps the attempt count and pushes
    /// the backoff out. Non-retriable errors and attempts past the ceiling
    /// are discarded immediately — a discarded duplicate-key failure is an
    /// idempotency signal, not work to redo.
    pub async fn record(
        pool: &sqlx::PgPool,
        entity_kind: EntityKind,
        entity_id: Uuid,
        details: &FailureDetails,
        base_backoff_secs: i64,
        max_attempts: i32,
    ) -> Result<Self, sqlx::Error> {
        let existing = Self::find_pending(pool, entity_kind, entity_id).await?;
        let attempt_count = existing.as_ref().map_or(1, |f| f.attempt_count + 1);

        let (status, next_attempt_at) = if !details.retriable || attempt_count > max_attempts {
            (FailureStatus::Discarded, None)
        } else {
            let delay = backoff_delay_secs(base_backoff_secs, attempt_count);
            (
                FailureStatus::Pending,
                Some(Utc::now() + Duration::seconds(delay)),
            )
        };

        sqlx::query_as(
            r"
            INSERT INTO sync_failures (
                entity_kind, entity_id, error_name, error_code, error_message,
                error_labels, retriable, status, attempt_count,
                last_error_at, next_attempt_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), $10)
            ON CONFLICT (entity_kind, entity_id) WHERE status = 'pending'
            DO UPDATE SET
                error_name = EXCLUDED.error_name,
                error_code = EXCLUDED.error_code,
                error_message = EXCLUDED.error_message,
                error_labels = EXCLUDED.error_labels,
                retriable = EXCLUDED.retriable,
                status = EXCLUDED.status,
                attempt_count = EXCLUDED.attempt_count,
                last_error_at = NOW(),
                next_attempt_at = EXCLUDED.next_attempt_at,
                updated_at = NOW()
            RETURNING *
            ",
        )
        .bind(entity_kind)
        .bind(entity_id)
        .bind(&details.name)
        .bind(&details.code)
        .bind(&details.message)
        .bind(&details.labels)
        .bind(details.retriable)
        .bind(status.to_string())
        .bind(attempt_count)
        .bind(next_attempt_at)
        .fetch_one(pool)
        .await
    }

    /// Find the pending failure row for an entity, if any.
    pub async fn find_pending(
        pool: &sqlx::PgPool,
        entity_kind: EntityKind,
        entity_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM sync_failures
            WHERE entity_kind = $1 AND entity_id = $2 AND status = 'pending'
            ",
        )
        .bind(entity_kind)
        .bind(entity_id)
        .fetch_optional(pool)
        .await
    }

    /// Mark an entity's pending failure as resolved after a successful retry.
    pub async fn resolve(
        pool: &sqlx::PgPool,
        entity_kind: EntityKind,
        entity_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE sync_failures
            SET status = 'resolved', next_attempt_at = NULL, updated_at = NOW()
            WHERE entity_kind = $1 AND entity_id = $2 AND status = 'pending'
            ",
        )
        .bind(entity_kind)
        .bind(entity_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Pending failures due for a retry (`next_attempt_at <= now`), oldest first.
    pub async fn list_due(pool: &sqlx::PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM sync_failures
            WHERE status = 'pending'
                AND (next_attempt_at IS NULL OR next_attempt_at <= NOW())
            ORDER BY next_attempt_at ASC NULLS FIRST
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Pending payment-kind failures due now; the 15s backlog drain pulls these.
    pub async fn list_due_payments(
        pool: &sqlx::PgPool,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM sync_failures
            WHERE status = 'pending' AND entity_kind = 'payment'
                AND (next_attempt_at IS NULL OR next_attempt_at <= NOW())
            ORDER BY next_attempt_at ASC NULLS FIRST
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Recent failures for operator listings, newest first.
    pub async fn list_recent(
        pool: &sqlx::PgPool,
        status: Option<FailureStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        if let Some(status) = status {
            sqlx::query_as(
                r"
                SELECT * FROM sync_failures
                WHERE status = $1
                ORDER BY updated_at DESC
                LIMIT $2 OFFSET $3
                ",
            )
            .bind(status.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
        } else {
            sqlx::query_as(
                r"
                SELECT * FROM sync_failures
                ORDER BY updated_at DESC
                LIMIT $1 OFFSET $2
                ",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
        }
    }

    /// Count failures by status.
    pub async fn count_by_status(
        pool: &sqlx::PgPool,
        status: FailureStatus,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM sync_failures WHERE status = $1
            ",
        )
        .bind(status.to_string())
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay_secs(60, 0), 60);
        assert_eq!(backoff_delay_secs(60, 1), 120);
        assert_eq!(backoff_delay_secs(60, 2), 240);
        assert_eq!(backoff_delay_secs(60, 5), 1920);
    }

    #[test]
    fn test_backoff_capped_at_24h() {
        assert_eq!(backoff_delay_secs(60, 20), MAX_BACKOFF_SECS);
        // Shift amounts beyond 30 are clamped rather than overflowing.
        assert_eq!(backoff_delay_secs(60, i32::MAX), MAX_BACKOFF_SECS);
    }

    #[test]
    fn test_entity_kind_round_trip() {
        for k in ["payment", "property", "user"] {
            let parsed: EntityKind = k.parse().unwrap();
            assert_eq!(parsed.to_string(), k);
        }
        assert!("lease".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_failure_status_display() {
        assert_eq!(FailureStatus::Pending.to_string(), "pending");
        assert_eq!(FailureStatus::Resolved.to_string(), "resolved");
        assert_eq!(FailureStatus::Discarded.to_string(), "discarded");
    }
}
