//! Handlers for synchronization lifecycle, status, and health.

use axum::extract::{Query, State};
use axum::Json;

use crate::error::ApiResult;
use crate::models::{ApiResponse, FullSyncResponse, HealthQuery, StartSyncResponse};
use crate::router::SyncApiState;
use propledger_sync::{FullSyncStatus, HealthReport, SyncStats, SyncStatus};

/// Start synchronization (push mode with poll fallback).
#[utoipa::path(
    post,
    path = "/sync/start",
    responses(
        (status = 200, description = "Synchronization started"),
        (status = 500, description = "Detector setup failed")
    ),
    tag = "Sync"
)]
pub async fn start_sync(
    State(state): State<SyncApiState>,
) -> ApiResult<Json<ApiResponse<StartSyncResponse>>> {
    let mode = state.engine.start().await?;
    Ok(Json(ApiResponse::ok(StartSyncResponse {
        detection_mode: mode.to_string(),
    })))
}

/// Stop synchronization. In-flight operations run to completion.
#[utoipa::path(
    post,
    path = "/sync/stop",
    responses((status = 200, description = "Synchronization stopped")),
    tag = "Sync"
)]
pub async fn stop_sync(State(state): State<SyncApiState>) -> Json<ApiResponse<()>> {
    state.engine.stop().await;
    Json(ApiResponse::message("Synchronization stopped"))
}

/// Kick off a full sync; returns a job id immediately while the sync
/// continues in the background.
#[utoipa::path(
    post,
    path = "/sync/full",
    responses((status = 202, description = "Full sync started", body = FullSyncResponse)),
    tag = "Sync"
)]
pub async fn run_full_sync(
    State(state): State<SyncApiState>,
) -> Json<ApiResponse<FullSyncResponse>> {
    let job_id = state.engine.run_full_sync();
    Json(ApiResponse::ok(FullSyncResponse { job_id }))
}

/// Status of the background full-sync job.
#[utoipa::path(
    get,
    path = "/sync/full/status",
    responses((status = 200, description = "Full sync status")),
    tag = "Sync"
)]
pub async fn full_sync_status(
    State(state): State<SyncApiState>,
) -> Json<ApiResponse<FullSyncStatus>> {
    Json(ApiResponse::ok(state.engine.full_sync_status()))
}

/// Engine status: detection mode, enabled schedules, full-sync state.
#[utoipa::path(
    get,
    path = "/sync/status",
    responses((status = 200, description = "Engine status")),
    tag = "Sync"
)]
pub async fn sync_status(State(state): State<SyncApiState>) -> Json<ApiResponse<SyncStatus>> {
    Json(ApiResponse::ok(state.engine.status().await))
}

/// Aggregate ledger-store counters.
#[utoipa::path(
    get,
    path = "/sync/stats",
    responses((status = 200, description = "Engine statistics")),
    tag = "Sync"
)]
pub async fn sync_stats(
    State(state): State<SyncApiState>,
) -> ApiResult<Json<ApiResponse<SyncStats>>> {
    Ok(Json(ApiResponse::ok(state.engine.stats().await?)))
}

/// Health check. The default quick mode is timeout-bounded and reports
/// `degraded` rather than hanging behind a slow audit; `deep=true` runs
/// the full audit.
#[utoipa::path(
    get,
    path = "/sync/health",
    params(HealthQuery),
    responses((status = 200, description = "Health report")),
    tag = "Sync"
)]
pub async fn sync_health(
    State(state): State<SyncApiState>,
    Query(query): Query<HealthQuery>,
) -> ApiResult<Json<ApiResponse<HealthReport>>> {
    let report = state.engine.health(query.deep).await?;
    Ok(Json(ApiResponse::ok(report)))
}
