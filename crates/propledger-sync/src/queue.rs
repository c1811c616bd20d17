//! Maintenance job queue worker.
//!
//! Executes long-running maintenance operations on exactly one worker at a
//! time across a fleet. The claim update in the model is the mutual
//! exclusion; this module adds the poll loop, lease recovery, and the
//! operation registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use propledger_db::models::{
    CompanyAccount, EnqueueJob, LedgerType, MaintenanceJob, Property, PropertyAccount,
};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::poster::LedgerPoster;

/// A named maintenance operation executable from the queue.
#[async_trait]
pub trait MaintenanceOperation: Send + Sync {
    /// The operation name jobs are enqueued under.
    fn name(&self) -> &'static str;

    /// Run the operation, returning a structured result for operators.
    async fn execute(&self, job: &MaintenanceJob) -> SyncResult<serde_json::Value>;
}

/// Polls the queue, recovers expired leases, and executes claimed jobs.
pub struct QueueWorker {
    ledger: PgPool,
    operations: HashMap<&'static str, Arc<dyn MaintenanceOperation>>,
    worker_id: String,
    poll_interval: Duration,
    lease_secs: i64,
    base_backoff_secs: i64,
}

impl QueueWorker {
    /// Create a worker with a fleet-unique id.
    #[must_use]
    pub fn new(ledger: PgPool, config: &EngineConfig) -> Self {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string());
        let worker_id = format!("{host}-{}", &Uuid::new_v4().to_string()[..8]);

        Self {
            ledger,
            operations: HashMap::new(),
            worker_id,
            poll_interval: Duration::from_secs(config.queue_poll_secs),
            lease_secs: config.queue_lease_secs,
            base_backoff_secs: config.queue_base_backoff_secs,
        }
    }

    /// This worker's fleet-unique id.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Register an operation implementation.
    pub fn register(&mut self, operation: Arc<dyn MaintenanceOperation>) {
        self.operations.insert(operation.name(), operation);
    }

    /// Registered operation names.
    #[must_use]
    pub fn operation_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.operations.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Whether an operation name is known to this worker.
    #[must_use]
    pub fn supports(&self, operation: &str) -> bool {
        self.operations.contains_key(operation)
    }

    /// Spawn the poll loop.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                worker_id = %self.worker_id,
                poll_secs = self.poll_interval.as_secs(),
                "Maintenance queue worker started"
            );
            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => self.tick().await,
                }
            }
            debug!(worker_id = %self.worker_id, "Maintenance queue worker stopped");
        })
    }

    async fn tick(&self) {
        // Crash recovery first: jobs stuck in running past their lease go
        // back to pending before anything new is claimed.
        match MaintenanceJob::release_expired_leases(&self.ledger).await {
            Ok(0) => {}
            Ok(released) => {
                warn!(released, "Requeued maintenance jobs with expired leases");
            }
            Err(e) => {
                warn!(error = %e, "Lease recovery failed");
                return;
            }
        }

        loop {
            match MaintenanceJob::claim_next(&self.ledger, &self.worker_id, self.lease_secs).await {
                Ok(Some(job)) => self.execute_job(job).await,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Job claim failed");
                    break;
                }
            }
        }
    }

    async fn execute_job(&self, job: MaintenanceJob) {
        info!(
            job_id = %job.id,
            operation = %job.operation,
            company_id = %job.company_id,
            attempt = job.attempts,
            "Executing maintenance job"
        );

        let result = match self.operations.get(job.operation.as_str()) {
            Some(op) => op.execute(&job).await,
            None => Err(SyncError::UnknownOperation(job.operation.clone())),
        };

        match result {
            Ok(value) => {
                if let Err(e) = MaintenanceJob::complete(&self.ledger, job.id, value).await {
                    error!(job_id = %job.id, error = %e, "Failed to mark job completed");
                }
            }
            Err(e) => {
                warn!(job_id = %job.id, operation = %job.operation, error = %e, "Maintenance job failed");
                match MaintenanceJob::fail(
                    &self.ledger,
                    job.id,
                    &e.to_string(),
                    self.base_backoff_secs,
                )
                .await
                {
                    Ok(Some(updated)) if updated.status == propledger_db::models::JobStatus::Failed => {
                        error!(job_id = %job.id, "Maintenance job failed permanently");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(job_id = %job.id, error = %e, "Failed to record job failure");
                    }
                }
            }
        }
    }
}

/// Convenience wrapper for enqueueing well-known operations.
pub async fn enqueue_operation(
    ledger: &PgPool,
    operation: &str,
    company_id: Uuid,
    requested_by: &str,
) -> SyncResult<MaintenanceJob> {
    Ok(MaintenanceJob::enqueue(
        ledger,
        &EnqueueJob {
            operation: operation.to_string(),
            company_id,
            requested_by: requested_by.to_string(),
            payload: serde_json::json!({}),
            max_attempts: None,
        },
    )
    .await?)
}

// ── Built-in operations ─────────────────────────────────────────────────

/// Re-sync every property ledger of a company: metadata upserts plus
/// re-posting of the company's recent completed payments.
pub struct SyncPropertyAccountsOp {
    ops: PgPool,
    poster: Arc<LedgerPoster>,
}

impl SyncPropertyAccountsOp {
    #[must_use]
    pub fn new(ops: PgPool, poster: Arc<LedgerPoster>) -> Self {
        Self { ops, poster }
    }
}

#[async_trait]
impl MaintenanceOperation for SyncPropertyAccountsOp {
    fn name(&self) -> &'static str {
        "sync_property_accounts"
    }

    async fn execute(&self, job: &MaintenanceJob) -> SyncResult<serde_json::Value> {
        let properties = Property::list_by_company(&self.ops, job.company_id).await?;
        let mut synced = 0u64;
        let mut failed = 0u64;

        for property in &properties {
            match self.poster.sync_property_metadata(property).await {
                Ok(()) => synced += 1,
                Err(e) => {
                    failed += 1;
                    warn!(property_id = %property.id, error = %e, "Property account sync failed");
                }
            }
        }

        Ok(serde_json::json!({
            "properties": properties.len(),
            "synced": synced,
            "failed": failed,
        }))
    }
}

/// Ensure the company's ledger document exists.
pub struct EnsureCompanyLedgersOp {
    ledger: PgPool,
}

impl EnsureCompanyLedgersOp {
    #[must_use]
    pub fn new(ledger: PgPool) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl MaintenanceOperation for EnsureCompanyLedgersOp {
    fn name(&self) -> &'static str {
        "ensure_company_ledgers"
    }

    async fn execute(&self, job: &MaintenanceJob) -> SyncResult<serde_json::Value> {
        let account = CompanyAccount::ensure(&self.ledger, job.company_id).await?;
        Ok(serde_json::json!({ "account_id": account.id }))
    }
}

/// Recompute aggregates of every ledger belonging to a company from the
/// live transaction sets.
pub struct RecomputeLedgerTotalsOp {
    ops: PgPool,
    ledger: PgPool,
}

impl RecomputeLedgerTotalsOp {
    #[must_use]
    pub fn new(ops: PgPool, ledger: PgPool) -> Self {
        Self { ops, ledger }
    }
}

#[async_trait]
impl MaintenanceOperation for RecomputeLedgerTotalsOp {
    fn name(&self) -> &'static str {
        "recompute_ledger_totals"
    }

    async fn execute(&self, job: &MaintenanceJob) -> SyncResult<serde_json::Value> {
        let mut recomputed = 0u64;

        for property in Property::list_by_company(&self.ops, job.company_id).await? {
            for ledger_type in [LedgerType::Rental, LedgerType::Sale] {
                if let Some(account) =
                    PropertyAccount::find_active(&self.ledger, property.id, ledger_type).await?
                {
                    PropertyAccount::recompute_totals(&self.ledger, account.id).await?;
                    recomputed += 1;
                }
            }
        }

        if let Some(account) = CompanyAccount::find_active(&self.ledger, job.company_id).await? {
            CompanyAccount::recompute_totals(&self.ledger, account.id).await?;
            recomputed += 1;
        }

        Ok(serde_json::json!({ "accounts_recomputed": recomputed }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopOp;

    #[async_trait]
    impl MaintenanceOperation for NoopOp {
        fn name(&self) -> &'static str {
            "noop"
        }

        async fn execute(&self, _job: &MaintenanceJob) -> SyncResult<serde_json::Value> {
            Ok(serde_json::json!({}))
        }
    }

    #[tokio::test]
    async fn test_worker_registry() {
        let pool_opts = sqlx::postgres::PgPoolOptions::new();
        // A lazily-connecting pool never touches the network in this test.
        let pool = pool_opts.connect_lazy("postgres://localhost/propledger_test");
        let mut worker = QueueWorker::new(pool.unwrap(), &EngineConfig::default());

        assert!(!worker.supports("noop"));
        worker.register(Arc::new(NoopOp));
        assert!(worker.supports("noop"));
        assert_eq!(worker.operation_names(), vec!["noop"]);
        assert!(!worker.worker_id().is_empty());
    }
}
