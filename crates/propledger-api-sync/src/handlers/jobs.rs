//! Handlers for the maintenance job queue.

use axum::extract::{Path, Query, State};
use axum::Json;
use propledger_db::models::{EnqueueJob, MaintenanceJob};
use uuid::Uuid;

use crate::error::{ApiResult, ApiSyncError};
use crate::models::{ApiResponse, EnqueueJobRequest, ListJobsQuery};
use crate::router::SyncApiState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

/// Enqueue a maintenance job. An already pending/running job for the same
/// (operation, company) is returned instead of creating a duplicate.
#[utoipa::path(
    post,
    path = "/maintenance/jobs",
    request_body = EnqueueJobRequest,
    responses(
        (status = 200, description = "Job enqueued (or existing job returned)"),
        (status = 400, description = "Unknown operation")
    ),
    tag = "Maintenance"
)]
pub async fn enqueue_job(
    State(state): State<SyncApiState>,
    Json(request): Json<EnqueueJobRequest>,
) -> ApiResult<Json<ApiResponse<MaintenanceJob>>> {
    if !state.engine.supports_operation(&request.operation) {
        return Err(ApiSyncError::Validation(format!(
            "Unknown maintenance operation: {}",
            request.operation
        )));
    }

    let job = MaintenanceJob::enqueue(
        state.engine.ledger_pool(),
        &EnqueueJob {
            operation: request.operation,
            company_id: request.company_id,
            requested_by: request.requested_by.unwrap_or_else(|| "api".to_string()),
            payload: request.payload.unwrap_or_else(|| serde_json::json!({})),
            max_attempts: None,
        },
    )
    .await?;

    Ok(Json(ApiResponse::ok(job)))
}

/// List maintenance jobs for a company, newest first.
#[utoipa::path(
    get,
    path = "/maintenance/jobs",
    params(ListJobsQuery),
    responses((status = 200, description = "Jobs for the company")),
    tag = "Maintenance"
)]
pub async fn list_jobs(
    State(state): State<SyncApiState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<ApiResponse<Vec<MaintenanceJob>>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    let jobs = MaintenanceJob::list_for_company(
        state.engine.ledger_pool(),
        query.company_id,
        limit,
        offset,
    )
    .await?;
    Ok(Json(ApiResponse::ok(jobs)))
}

/// Inspect one maintenance job.
#[utoipa::path(
    get,
    path = "/maintenance/jobs/{id}",
    params(("id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job details"),
        (status = 404, description = "Job not found")
    ),
    tag = "Maintenance"
)]
pub async fn get_job(
    State(state): State<SyncApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<MaintenanceJob>>> {
    let job = MaintenanceJob::find_by_id(state.engine.ledger_pool(), id)
        .await?
        .ok_or_else(|| ApiSyncError::NotFound(format!("maintenance job {id}")))?;
    Ok(Json(ApiResponse::ok(job)))
}
