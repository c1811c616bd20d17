//! Maintenance job model.
//!
//! A lease-based work queue: the atomic claim update is the only
//! cross-process mutual-exclusion primitive in the system. No external
//! lock service or broker is involved.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker holding a live lease.
    Running,
    /// Finished successfully.
    Completed,
    /// Exhausted attempts; terminal.
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Default lease duration in seconds.
pub const DEFAULT_LEASE_SECS: i64 = 120;

/// Default delay added when an expired lease is requeued.
pub const LEASE_REQUEUE_DELAY_SECS: i64 = 10;

/// Default maximum execution attempts.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// A queued maintenance job.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MaintenanceJob {
    pub id: Uuid,
    pub operation: String,
    pub company_id: Uuid,
    pub requested_by: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_after: DateTime<Utc>,
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to enqueue a maintenance job.
#[derive(Debug, Clone)]
pub struct EnqueueJob {
    pub operation: String,
    pub company_id: Uuid,
    pub requested_by: String,
    pub payload: serde_json::Value,
    pub max_attempts: Option<i32>,
}

impl MaintenanceJob {
    /// Enqueue a job, deduplicating on (operation, company).
    ///
    /// If a job for the same operation and company is already pending or
    /// running, the existing job is returned instead of creating a new one.
    pub async fn enqueue(pool: &sqlx::PgPool, input: &EnqueueJob) -> Result<Self, sqlx::Error> {
        if let Some(existing) = sqlx::query_as::<_, Self>(
            r"
            SELECT * FROM maintenance_jobs
            WHERE operation = $1 AND company_id = $2
                AND status IN ('pending', 'running')
            LIMIT 1
            ",
        )
        .bind(&input.operation)
        .bind(input.company_id)
        .fetch_optional(pool)
        .await?
        {
            return Ok(existing);
        }

        sqlx::query_as(
            r"
            INSERT INTO maintenance_jobs (
                operation, company_id, requested_by, payload, max_attempts
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            ",
        )
        .bind(&input.operation)
        .bind(input.company_id)
        .bind(&input.requested_by)
        .bind(&input.payload)
        .bind(input.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS))
        .fetch_one(pool)
        .await
    }

    /// Atomically claim the oldest eligible pending job.
    ///
    /// The inner `FOR UPDATE SKIP LOCKED` select plus the single update make
    /// this safe under concurrent pollers: exactly one worker observes the
    /// row transition to `running`; the others see no eligible job.
    pub async fn claim_next(
        pool: &sqlx::PgPool,
        worker_id: &str,
        lease_secs: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE maintenance_jobs j
            SET status = 'running',
                worker_id = $1,
                lease_expires_at = NOW() + ($2 * INTERVAL '1 second'),
                attempts = j.attempts + 1,
                started_at = NOW(),
                updated_at = NOW()
            WHERE j.id = (
                SELECT id FROM maintenance_jobs
                WHERE status = 'pending' AND run_after <= NOW()
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            ",
        )
        .bind(worker_id)
        .bind(lease_secs)
        .fetch_optional(pool)
        .await
    }

    /// Requeue running jobs whose lease has expired (worker presumed
    /// crashed), with a short extra delay. Returns the number requeued.
    pub async fn release_expired_leases(pool: &sqlx::PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE maintenance_jobs
            SET status = 'pending',
                worker_id = NULL,
                lease_expires_at = NULL,
                run_after = NOW() + ($1 * INTERVAL '1 second'),
                updated_at = NOW()
            WHERE status = 'running' AND lease_expires_at < NOW()
            ",
        )
        .bind(LEASE_REQUEUE_DELAY_SECS)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Mark a job completed with a structured result.
    pub async fn complete(
        pool: &sqlx::PgPool,
        id: Uuid,
        result: serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let r = sqlx::query(
            r"
            UPDATE maintenance_jobs
            SET status = 'completed',
                result = $2,
                lease_expires_at = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            ",
        )
        .bind(id)
        .bind(result)
        .execute(pool)
        .await?;

        Ok(r.rows_affected() > 0)
    }

    /// Record a failed execution: requeue with exponential backoff while
    /// attempts remain, else mark terminally failed with the error kept
    /// for operators.
    pub async fn fail(
        pool: &sqlx::PgPool,
        id: Uuid,
        error_message: &str,
        base_backoff_secs: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        let job = match Self::find_by_id(pool, id).await? {
            Some(j) => j,
            None => return Ok(None),
        };

        if job.attempts >= job.max_attempts {
            sqlx::query_as(
                r"
                UPDATE maintenance_jobs
                SET status = 'failed',
                    last_error = $2,
                    lease_expires_at = NULL,
                    completed_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1
                RETURNING *
                ",
            )
            .bind(id)
            .bind(error_message)
            .fetch_optional(pool)
            .await
        } else {
            let delay_secs = base_backoff_secs * (1i64 << job.attempts.clamp(0, 10));
            let run_after = Utc::now() + Duration::seconds(delay_secs);
            sqlx::query_as(
                r"
                UPDATE maintenance_jobs
                SET status = 'pending',
                    last_error = $2,
                    worker_id = NULL,
                    lease_expires_at = NULL,
                    run_after = $3,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING *
                ",
            )
            .bind(id)
            .bind(error_message)
            .bind(run_after)
            .fetch_optional(pool)
            .await
        }
    }

    /// Find a job by ID.
    pub async fn find_by_id(pool: &sqlx::PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM maintenance_jobs WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// List jobs for a company, newest first.
    pub async fn list_for_company(
        pool: &sqlx::PgPool,
        company_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM maintenance_jobs
            WHERE company_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(company_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    /// Count jobs by status.
    pub async fn count_by_status(
        pool: &sqlx::PgPool,
        status: JobStatus,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM maintenance_jobs WHERE status = $1
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
    fn test_job_status_terminality() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_job_status_display() {
        assert_eq!(JobStatus::Pending.to_string(), "pending");
        assert_eq!(JobStatus::Running.to_string(), "running");
        assert_eq!(JobStatus::Completed.to_string(), "completed");
        assert_eq!(JobStatus::Failed.to_string(), "failed");
    }
}
