//! The sync engine facade.
//!
//! An explicitly constructed, dependency-injected component with a
//! start/stop lifecycle: owns the detector, the event pump, the backlog
//! drain, the schedule registry, and the maintenance queue worker. The
//! HTTP layer talks only to this type.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use propledger_db::models::{
    CompanyAccount, EntityKind, JobStatus, LedgerTransaction, Payment, Property, PropertyAccount,
    SyncFailure,
};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::consistency::{ConsistencyChecker, ConsistencyReport, QuickCheckOutcome};
use crate::dedup::Deduplicator;
use crate::detector::{start_detector, DetectionMode, DetectorHandle};
use crate::error::{SyncError, SyncResult};
use crate::poster::{LedgerPoster, PostingOutcome};
use crate::queue::{
    EnsureCompanyLedgersOp, QueueWorker, RecomputeLedgerTotalsOp, SyncPropertyAccountsOp,
};
use crate::resilience::{CircuitBreaker, RetryExecutor};
use crate::scheduler::{ScheduleFrequency, ScheduleRegistry};

/// Status of the background full-sync job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FullSyncStatus {
    pub in_progress: bool,
    pub job_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Result of one full-sync pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FullSyncReport {
    pub properties_synced: u64,
    pub payments_processed: u64,
    pub payments_failed: u64,
}

/// Engine status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub running: bool,
    pub detection_mode: Option<DetectionMode>,
    pub schedules_enabled: usize,
    pub full_sync: FullSyncStatus,
}

/// Aggregate counters for operators.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub pending_failures: i64,
    pub discarded_failures: i64,
    pub property_accounts: i64,
    pub company_accounts: i64,
    pub live_transactions: i64,
    pub pending_jobs: i64,
    pub running_jobs: i64,
}

/// Overall health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health report; the quick variant is timeout-bounded and never hangs the
/// caller behind a slow audit.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub detection_mode: Option<DetectionMode>,
    pub schedules_active: bool,
    /// "ok" | "inconsistent" | "timeout"
    pub consistency_check: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ConsistencyReport>,
}

/// Result of a failure-reprocessing batch.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReprocessStats {
    pub processed: u64,
    pub resolved: u64,
    pub failed: u64,
}

/// The work an operator-defined schedule runs. Custom schedules pick one
/// of the engine's passes; arbitrary code does not travel over the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePass {
    /// Re-post payments completed in the last two hours.
    IncrementalSync,
    /// Full property + payment synchronization.
    FullSync,
    /// Re-post recent payments and dedupe touched ledgers.
    Reconciliation,
    /// Retry due sync failures.
    FailureReprocessing,
    /// Deep consistency audit with auto-repair.
    Audit,
}

struct EngineRuntime {
    detector: DetectorHandle,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// The synchronization & reconciliation engine.
pub struct SyncEngine {
    ops: PgPool,
    ledger: PgPool,
    config: EngineConfig,
    poster: Arc<LedgerPoster>,
    checker: Arc<ConsistencyChecker>,
    registry: Arc<ScheduleRegistry>,
    worker: Arc<QueueWorker>,
    breaker: Arc<CircuitBreaker>,
    runtime: tokio::sync::Mutex<Option<EngineRuntime>>,
    detection_mode: RwLock<Option<DetectionMode>>,
    full_sync: Arc<Mutex<FullSyncStatus>>,
}

impl SyncEngine {
    /// Construct the engine and register the built-in schedules and
    /// maintenance operations. Nothing runs until [`SyncEngine::start`].
    #[must_use]
    pub fn new(ops: PgPool, ledger: PgPool, config: EngineConfig) -> Arc<Self> {
        let breaker = Arc::new(CircuitBreaker::with_defaults());
        let retry = RetryExecutor::with_defaults();

        let poster = Arc::new(LedgerPoster::new(
            ops.clone(),
            ledger.clone(),
            retry,
            breaker.clone(),
            config.failure_base_backoff_secs,
            config.failure_max_attempts,
        ));

        let checker = Arc::new(ConsistencyChecker::new(
            ops.clone(),
            ledger.clone(),
            poster.clone(),
            config.lookback_days,
            Duration::from_secs(config.quick_check_timeout_secs),
        ));

        let mut worker = QueueWorker::new(ledger.clone(), &config);
        worker.register(Arc::new(SyncPropertyAccountsOp::new(
            ops.clone(),
            poster.clone(),
        )));
        worker.register(Arc::new(EnsureCompanyLedgersOp::new(ledger.clone())));
        worker.register(Arc::new(RecomputeLedgerTotalsOp::new(
            ops.clone(),
            ledger.clone(),
        )));

        let engine = Self {
            ops,
            ledger,
            config,
            poster,
            checker,
            registry: Arc::new(ScheduleRegistry::new()),
            worker: Arc::new(worker),
            breaker,
            runtime: tokio::sync::Mutex::new(None),
            detection_mode: RwLock::new(None),
            full_sync: Arc::new(Mutex::new(FullSyncStatus::default())),
        };
        engine.register_builtin_schedules();
        Arc::new(engine)
    }

    /// The ledger-store pool (handlers use it for listings).
    #[must_use]
    pub fn ledger_pool(&self) -> &PgPool {
        &self.ledger
    }

    /// The schedule registry.
    #[must_use]
    pub fn schedules(&self) -> &ScheduleRegistry {
        &self.registry
    }

    /// The shared circuit breaker (exposed for status/introspection).
    #[must_use]
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Whether the queue worker knows a maintenance operation.
    #[must_use]
    pub fn supports_operation(&self, operation: &str) -> bool {
        self.worker.supports(operation)
    }

    fn register_builtin_schedules(&self) {
        {
            let ops = self.ops.clone();
            let poster = self.poster.clone();
            self.registry.register(
                "hourly_sync",
                "Incremental re-post of recently completed payments",
                ScheduleFrequency::Hourly,
                Arc::new(move || {
                    let ops = ops.clone();
                    let poster = poster.clone();
                    Box::pin(async move {
                        sync_recent_payments(&ops, &poster, chrono::Duration::hours(2)).await
                    })
                }),
            );
        }

        {
            let ops = self.ops.clone();
            let poster = self.poster.clone();
            let batch = self.config.full_sync_batch_size;
            self.registry.register(
                "daily_sync",
                "Daily full synchronization of properties and payments",
                ScheduleFrequency::Daily { hour: 2 },
                Arc::new(move || {
                    let ops = ops.clone();
                    let poster = poster.clone();
                    Box::pin(async move {
                        full_sync_pass(&ops, &poster, batch).await.map(|_| ())
                    })
                }),
            );
        }

        {
            let ops = self.ops.clone();
            let ledger = self.ledger.clone();
            let poster = self.poster.clone();
            self.registry.register(
                "ledger_reconciliation",
                "Re-post recent payments and archive duplicate postings",
                ScheduleFrequency::EveryMinutes(5),
                Arc::new(move || {
                    let ops = ops.clone();
                    let ledger = ledger.clone();
                    let poster = poster.clone();
                    Box::pin(async move {
                        reconciliation_pass(&ops, &ledger, &poster, chrono::Duration::hours(1))
                            .await
                    })
                }),
            );
        }

        {
            let ledger = self.ledger.clone();
            let poster = self.poster.clone();
            let batch = self.config.failure_batch_size;
            self.registry.register(
                "failure_reprocessing",
                "Retry pending sync failures that are due",
                ScheduleFrequency::EveryMinutes(5),
                Arc::new(move || {
                    let ledger = ledger.clone();
                    let poster = poster.clone();
                    Box::pin(async move {
                        reprocess_due_failures(&ledger, &poster, batch, false)
                            .await
                            .map(|_| ())
                    })
                }),
            );
        }

        {
            let checker = self.checker.clone();
            self.registry.register(
                "weekly_audit",
                "Deep consistency audit with auto-repair of known-safe issues",
                ScheduleFrequency::Weekly {
                    weekday: 0,
                    hour: 3,
                },
                Arc::new(move || {
                    let checker = checker.clone();
                    Box::pin(async move { checker.check(true).await.map(|_| ()) })
                }),
            );
        }

        {
            let ops = self.ops.clone();
            let ledger = self.ledger.clone();
            let poster = self.poster.clone();
            let batch = self.config.full_sync_batch_size;
            self.registry.register(
                "monthly_deep_sync",
                "Full sync plus per-company ledger housekeeping jobs",
                ScheduleFrequency::Monthly { day: 1, hour: 4 },
                Arc::new(move || {
                    let ops = ops.clone();
                    let ledger = ledger.clone();
                    let poster = poster.clone();
                    Box::pin(async move {
                        full_sync_pass(&ops, &poster, batch).await?;
                        for company_id in Property::list_company_ids(&ops).await? {
                            crate::queue::enqueue_operation(
                                &ledger,
                                "recompute_ledger_totals",
                                company_id,
                                "monthly_deep_sync",
                            )
                            .await?;
                        }
                        Ok(())
                    })
                }),
            );
        }
    }

    /// Start synchronization: detection (push with poll fallback), the
    /// event pump, the backlog drain, all schedules, and the queue
    /// worker. Idempotent; returns the active detection mode.
    pub async fn start(&self) -> SyncResult<DetectionMode> {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            return Ok(self
                .detection_mode
                .read()
                .expect("detection mode poisoned")
                .expect("runtime without mode"));
        }

        let (tx, mut rx) = mpsc::channel(1024);
        let detector = start_detector(self.ops.clone(), &self.config, tx).await?;
        let mode = detector.mode;

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        // Event pump: the single consumer both strategies feed.
        {
            let poster = self.poster.clone();
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        event = rx.recv() => match event {
                            Some(event) => poster.handle_event(event).await,
                            None => break,
                        }
                    }
                }
                debug!("Event pump stopped");
            }));
        }

        // Ledger-event backlog drain, independent of detection mode.
        {
            let ledger = self.ledger.clone();
            let poster = self.poster.clone();
            let shutdown = shutdown.clone();
            let period = Duration::from_secs(self.config.backlog_drain_secs);
            let batch = self.config.backlog_batch_size;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) =
                                reprocess_due_failures(&ledger, &poster, batch, true).await
                            {
                                warn!(error = %e, "Backlog drain failed");
                            }
                        }
                    }
                }
                debug!("Backlog drain stopped");
            }));
        }

        tasks.push(self.worker.clone().spawn(shutdown.clone()));
        self.registry.start_all();

        *self
            .detection_mode
            .write()
            .expect("detection mode poisoned") = Some(mode);
        *runtime = Some(EngineRuntime {
            detector,
            shutdown,
            tasks,
        });

        info!(mode = %mode, "Sync engine started");
        Ok(mode)
    }

    /// Stop synchronization. In-flight operations run to completion; the
    /// timers stop at their next tick boundary.
    pub async fn stop(&self) {
        let mut runtime = self.runtime.lock().await;
        if let Some(rt) = runtime.take() {
            rt.detector.stop().await;
            rt.shutdown.cancel();
            for task in rt.tasks {
                let _ = task.await;
            }
            self.registry.stop_all();
            *self
                .detection_mode
                .write()
                .expect("detection mode poisoned") = None;
            info!("Sync engine stopped");
        }
    }

    /// Kick off a full sync in the background, returning its job id
    /// immediately. A full sync already in flight is returned as-is.
    pub fn run_full_sync(self: &Arc<Self>) -> Uuid {
        {
            let status = self.full_sync.lock().expect("full sync status poisoned");
            if status.in_progress {
                if let Some(job_id) = status.job_id {
                    return job_id;
                }
            }
        }

        let job_id = Uuid::new_v4();
        {
            let mut status = self.full_sync.lock().expect("full sync status poisoned");
            *status = FullSyncStatus {
                in_progress: true,
                job_id: Some(job_id),
                started_at: Some(Utc::now()),
                completed_at: None,
                last_error: None,
            };
        }

        let engine = self.clone();
        tokio::spawn(async move {
            let result =
                full_sync_pass(&engine.ops, &engine.poster, engine.config.full_sync_batch_size)
                    .await;

            let mut status = engine
                .full_sync
                .lock()
                .expect("full sync status poisoned");
            status.in_progress = false;
            status.completed_at = Some(Utc::now());
            match result {
                Ok(report) => {
                    info!(
                        job_id = %job_id,
                        properties = report.properties_synced,
                        payments = report.payments_processed,
                        failed = report.payments_failed,
                        "Full sync completed"
                    );
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Full sync failed");
                    status.last_error = Some(e.to_string());
                }
            }
        });

        job_id
    }

    /// Status of the background full-sync job.
    #[must_use]
    pub fn full_sync_status(&self) -> FullSyncStatus {
        self.full_sync
            .lock()
            .expect("full sync status poisoned")
            .clone()
    }

    /// Engine status snapshot.
    pub async fn status(&self) -> SyncStatus {
        let running = self.runtime.lock().await.is_some();
        let detection_mode = *self
            .detection_mode
            .read()
            .expect("detection mode poisoned");
        let schedules_enabled = self
            .registry
            .list()
            .into_iter()
            .filter(|s| s.enabled)
            .count();

        SyncStatus {
            running,
            detection_mode,
            schedules_enabled,
            full_sync: self.full_sync_status(),
        }
    }

    /// Aggregate counters from the ledger store.
    pub async fn stats(&self) -> SyncResult<SyncStats> {
        Ok(SyncStats {
            pending_failures: SyncFailure::count_by_status(
                &self.ledger,
                propledger_db::models::FailureStatus::Pending,
            )
            .await?,
            discarded_failures: SyncFailure::count_by_status(
                &self.ledger,
                propledger_db::models::FailureStatus::Discarded,
            )
            .await?,
            property_accounts: PropertyAccount::count_active(&self.ledger).await?,
            company_accounts: CompanyAccount::count_active(&self.ledger).await?,
            live_transactions: LedgerTransaction::count_live(&self.ledger).await?,
            pending_jobs: propledger_db::models::MaintenanceJob::count_by_status(
                &self.ledger,
                JobStatus::Pending,
            )
            .await?,
            running_jobs: propledger_db::models::MaintenanceJob::count_by_status(
                &self.ledger,
                JobStatus::Running,
            )
            .await?,
        })
    }

    /// Health report. Quick mode (the default for health endpoints) is
    /// timeout-bounded and degrades instead of hanging; `deep` runs the
    /// full audit. `unhealthy` means the whole pipeline is dark: no
    /// detection running and no schedule enabled.
    pub async fn health(&self, deep: bool) -> SyncResult<HealthReport> {
        let detection_mode = *self
            .detection_mode
            .read()
            .expect("detection mode poisoned");
        let schedules_active = self.registry.any_active();

        if detection_mode.is_none() && !schedules_active {
            return Ok(HealthReport {
                status: HealthStatus::Unhealthy,
                detection_mode,
                schedules_active,
                consistency_check: "skipped".to_string(),
                report: None,
            });
        }

        if deep {
            let report = self.checker.check(false).await?;
            let status = if report.is_consistent {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            };
            let consistency_check = if report.is_consistent {
                "ok"
            } else {
                "inconsistent"
            };
            return Ok(HealthReport {
                status,
                detection_mode,
                schedules_active,
                consistency_check: consistency_check.to_string(),
                report: Some(report),
            });
        }

        match self.checker.check_quick().await? {
            QuickCheckOutcome::Completed(report) => {
                let status = if report.is_consistent {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded
                };
                let consistency_check = if report.is_consistent {
                    "ok"
                } else {
                    "inconsistent"
                };
                Ok(HealthReport {
                    status,
                    detection_mode,
                    schedules_active,
                    consistency_check: consistency_check.to_string(),
                    report: Some(report),
                })
            }
            QuickCheckOutcome::TimedOut => Ok(HealthReport {
                status: HealthStatus::Degraded,
                detection_mode,
                schedules_active,
                consistency_check: "timeout".to_string(),
                report: None,
            }),
        }
    }

    /// Manually retry one failed entity. Unlike background loops, the
    /// error propagates to the caller.
    pub async fn retry_failure(&self, kind: EntityKind, entity_id: Uuid) -> SyncResult<()> {
        match self.poster.resync(kind, entity_id).await {
            Ok(()) => {
                SyncFailure::resolve(&self.ledger, kind, entity_id).await?;
                Ok(())
            }
            Err(e) => {
                self.poster.record_failure(kind, entity_id, &e).await;
                Err(e)
            }
        }
    }

    /// Reconcile a single payment's postings on demand.
    pub async fn reconcile_payment(&self, payment_id: Uuid) -> SyncResult<PostingOutcome> {
        self.poster.sync_payment(payment_id).await
    }

    /// Run a deep consistency check, optionally repairing.
    pub async fn check_consistency(&self, repair: bool) -> SyncResult<ConsistencyReport> {
        self.checker.check(repair).await
    }

    /// Register an operator-defined schedule running one of the engine's
    /// passes, optionally starting it immediately.
    pub fn add_schedule(
        &self,
        name: &str,
        description: &str,
        frequency: ScheduleFrequency,
        pass: SchedulePass,
        enabled: bool,
    ) -> SyncResult<()> {
        if self.registry.get(name).is_some() {
            return Err(SyncError::Validation(format!(
                "Schedule already exists: {name}"
            )));
        }

        let ops = self.ops.clone();
        let ledger = self.ledger.clone();
        let poster = self.poster.clone();
        let checker = self.checker.clone();
        let full_batch = self.config.full_sync_batch_size;
        let failure_batch = self.config.failure_batch_size;

        self.registry.register(
            name,
            description,
            frequency,
            Arc::new(move || {
                let ops = ops.clone();
                let ledger = ledger.clone();
                let poster = poster.clone();
                let checker = checker.clone();
                Box::pin(async move {
                    match pass {
                        SchedulePass::IncrementalSync => {
                            sync_recent_payments(&ops, &poster, chrono::Duration::hours(2)).await
                        }
                        SchedulePass::FullSync => {
                            full_sync_pass(&ops, &poster, full_batch).await.map(|_| ())
                        }
                        SchedulePass::Reconciliation => {
                            reconciliation_pass(&ops, &ledger, &poster, chrono::Duration::hours(1))
                                .await
                        }
                        SchedulePass::FailureReprocessing => {
                            reprocess_due_failures(&ledger, &poster, failure_batch, false)
                                .await
                                .map(|_| ())
                        }
                        SchedulePass::Audit => checker.check(true).await.map(|_| ()),
                    }
                })
            }),
        );

        if enabled {
            self.registry.start(name)?;
        }
        Ok(())
    }
}

// ── Scheduled pass bodies ───────────────────────────────────────────────

/// Re-post payments completed within the window. Idempotent: already
/// posted payments are no-ops.
async fn sync_recent_payments(
    ops: &PgPool,
    poster: &Arc<LedgerPoster>,
    window: chrono::Duration,
) -> SyncResult<()> {
    let since = Utc::now() - window;
    let payments = Payment::list_completed_since(ops, since, 5_000).await?;
    for payment in payments {
        if let Err(e) = poster.sync_payment(payment.id).await {
            poster
                .record_failure(EntityKind::Payment, payment.id, &e)
                .await;
        }
    }
    Ok(())
}

/// The 5-minute reconciliation pass: re-post recent payments, then dedupe
/// any account touched in the window.
async fn reconciliation_pass(
    ops: &PgPool,
    ledger: &PgPool,
    poster: &Arc<LedgerPoster>,
    window: chrono::Duration,
) -> SyncResult<()> {
    sync_recent_payments(ops, poster, window).await?;

    let dedup = Deduplicator::new(ledger.clone());
    let since = Utc::now() - window;
    for (account_id, kind) in LedgerTransaction::accounts_with_duplicates(ledger, since).await? {
        dedup.dedupe_account(account_id, kind).await?;
    }
    Ok(())
}

/// One full synchronization pass: every active property's metadata, then
/// every completed rental/sale payment, batched by settlement time.
async fn full_sync_pass(
    ops: &PgPool,
    poster: &Arc<LedgerPoster>,
    batch_size: i64,
) -> SyncResult<FullSyncReport> {
    let mut report = FullSyncReport::default();

    for property in Property::list_active(ops).await? {
        match poster.sync_property_metadata(&property).await {
            Ok(()) => report.properties_synced += 1,
            Err(e) => {
                poster
                    .record_failure(EntityKind::Property, property.id, &e)
                    .await;
            }
        }
    }

    // Epoch start keeps the cursor inside the store's timestamp range.
    let mut cursor = DateTime::<Utc>::UNIX_EPOCH;
    loop {
        let payments = Payment::list_completed_since(ops, cursor, batch_size).await?;
        let Some(last) = payments.last() else { break };
        let next_cursor = last.posting_date();

        for payment in &payments {
            report.payments_processed += 1;
            if let Err(e) = poster.sync_payment(payment.id).await {
                report.payments_failed += 1;
                poster
                    .record_failure(EntityKind::Payment, payment.id, &e)
                    .await;
            }
        }

        if (payments.len() as i64) < batch_size {
            break;
        }
        if next_cursor == cursor {
            // An entire batch shares one settlement timestamp; everything
            // in it was just processed, and re-reading would loop.
            warn!(cursor = %cursor, "Full sync cursor stalled on identical timestamps");
            break;
        }
        cursor = next_cursor;
    }

    Ok(report)
}

/// Retry due failures through the same per-kind sync operations used at
/// detection time. With `payments_only`, this is the 15-second
/// ledger-event backlog drain; otherwise it is the 5-minute
/// failure-reprocessing pass.
async fn reprocess_due_failures(
    ledger: &PgPool,
    poster: &Arc<LedgerPoster>,
    batch_size: i64,
    payments_only: bool,
) -> SyncResult<ReprocessStats> {
    let due = if payments_only {
        SyncFailure::list_due_payments(ledger, batch_size).await?
    } else {
        SyncFailure::list_due(ledger, batch_size).await?
    };

    let mut stats = ReprocessStats::default();
    for failure in due {
        stats.processed += 1;
        match poster.resync(failure.entity_kind, failure.entity_id).await {
            Ok(()) => {
                SyncFailure::resolve(ledger, failure.entity_kind, failure.entity_id).await?;
                stats.resolved += 1;
            }
            Err(e) => {
                stats.failed += 1;
                poster
                    .record_failure(failure.entity_kind, failure.entity_id, &e)
                    .await;
            }
        }
    }

    if stats.processed > 0 {
        info!(
            processed = stats.processed,
            resolved = stats.resolved,
            failed = stats.failed,
            payments_only,
            "Reprocessed sync failures"
        );
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_sync_status_default() {
        let status = FullSyncStatus::default();
        assert!(!status.in_progress);
        assert!(status.job_id.is_none());
        assert!(status.last_error.is_none());
    }

    #[test]
    fn test_health_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(HealthStatus::Degraded).unwrap(),
            serde_json::json!("degraded")
        );
        assert_eq!(
            serde_json::to_value(HealthStatus::Unhealthy).unwrap(),
            serde_json::json!("unhealthy")
        );
    }

    #[test]
    fn test_health_report_shape() {
        let report = HealthReport {
            status: HealthStatus::Degraded,
            detection_mode: None,
            schedules_active: true,
            consistency_check: "timeout".to_string(),
            report: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["consistency_check"], "timeout");
        assert!(json.get("report").is_none());
    }
}
