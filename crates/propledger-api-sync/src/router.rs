//! Router assembly for the sync API.

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use propledger_sync::SyncEngine;

use crate::handlers::{failures, jobs, schedules, sync};

/// Shared state for sync API handlers.
#[derive(Clone)]
pub struct SyncApiState {
    pub engine: Arc<SyncEngine>,
}

impl SyncApiState {
    /// Create handler state around the engine.
    #[must_use]
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

/// Build the sync API router.
#[must_use]
pub fn sync_router(state: SyncApiState) -> Router {
    Router::new()
        // Lifecycle & introspection
        .route("/sync/start", post(sync::start_sync))
        .route("/sync/stop", post(sync::stop_sync))
        .route("/sync/full", post(sync::run_full_sync))
        .route("/sync/full/status", get(sync::full_sync_status))
        .route("/sync/status", get(sync::sync_status))
        .route("/sync/stats", get(sync::sync_stats))
        .route("/sync/health", get(sync::sync_health))
        // Failure ledger & reconciliation
        .route("/sync/failures", get(failures::list_failures))
        .route(
            "/sync/failures/:kind/:id/retry",
            post(failures::retry_failure),
        )
        .route(
            "/sync/payments/:id/reconcile",
            post(failures::reconcile_payment),
        )
        .route(
            "/sync/consistency/check",
            post(failures::check_consistency),
        )
        // Schedules
        .route(
            "/sync/schedules",
            get(schedules::list_schedules).post(schedules::add_schedule),
        )
        .route(
            "/sync/schedules/start-all",
            post(schedules::start_all_schedules),
        )
        .route(
            "/sync/schedules/stop-all",
            post(schedules::stop_all_schedules),
        )
        .route(
            "/sync/schedules/:name",
            put(schedules::update_schedule).delete(schedules::remove_schedule),
        )
        .route(
            "/sync/schedules/:name/enable",
            post(schedules::enable_schedule),
        )
        .route(
            "/sync/schedules/:name/disable",
            post(schedules::disable_schedule),
        )
        // Maintenance queue
        .route(
            "/maintenance/jobs",
            post(jobs::enqueue_job).get(jobs::list_jobs),
        )
        .route("/maintenance/jobs/:id", get(jobs::get_job))
        .with_state(state)
}
