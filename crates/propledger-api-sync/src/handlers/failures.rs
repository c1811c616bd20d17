//! Handlers for the failure ledger and manual reconciliation.

use axum::extract::{Path, Query, State};
use axum::Json;
use propledger_db::models::{EntityKind, FailureStatus, SyncFailure};
use propledger_sync::{ConsistencyReport, PostingOutcome};
use uuid::Uuid;

use crate::error::{ApiResult, ApiSyncError};
use crate::models::{ApiResponse, ConsistencyQuery, FailureView, ListFailuresQuery};
use crate::router::SyncApiState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

/// List recent sync failures, optionally filtered by status.
#[utoipa::path(
    get,
    path = "/sync/failures",
    params(ListFailuresQuery),
    responses((status = 200, description = "Recent sync failures", body = [FailureView])),
    tag = "Sync Failures"
)]
pub async fn list_failures(
    State(state): State<SyncApiState>,
    Query(query): Query<ListFailuresQuery>,
) -> ApiResult<Json<ApiResponse<Vec<FailureView>>>> {
    let status = match query.status.as_deref() {
        None => None,
        Some("pending") => Some(FailureStatus::Pending),
        Some("resolved") => Some(FailureStatus::Resolved),
        Some("discarded") => Some(FailureStatus::Discarded),
        Some(other) => {
            return Err(ApiSyncError::Validation(format!(
                "Unknown failure status: {other}"
            )))
        }
    };

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    let failures =
        SyncFailure::list_recent(state.engine.ledger_pool(), status, limit, offset).await?;
    Ok(Json(ApiResponse::ok(
        failures.into_iter().map(FailureView::from).collect(),
    )))
}

/// Manually retry one failed entity. Unlike the background loops, a
/// renewed failure is returned to the caller.
#[utoipa::path(
    post,
    path = "/sync/failures/{kind}/{id}/retry",
    params(
        ("kind" = String, Path, description = "Entity kind (payment, property, user)"),
        ("id" = Uuid, Path, description = "Entity id")
    ),
    responses(
        (status = 200, description = "Retry succeeded"),
        (status = 400, description = "Unknown entity kind")
    ),
    tag = "Sync Failures"
)]
pub async fn retry_failure(
    State(state): State<SyncApiState>,
    Path((kind, id)): Path<(String, Uuid)>,
) -> ApiResult<Json<ApiResponse<()>>> {
    let kind: EntityKind = kind
        .parse()
        .map_err(|e: String| ApiSyncError::Validation(e))?;

    state.engine.retry_failure(kind, id).await?;
    Ok(Json(ApiResponse::message("Retry succeeded")))
}

/// Reconcile a single payment's ledger postings on demand.
#[utoipa::path(
    post,
    path = "/sync/payments/{id}/reconcile",
    params(("id" = Uuid, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment reconciled"),
        (status = 404, description = "Payment not found")
    ),
    tag = "Sync Failures"
)]
pub async fn reconcile_payment(
    State(state): State<SyncApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<ReconcileView>>> {
    let outcome = state.engine.reconcile_payment(id).await?;
    Ok(Json(ApiResponse::ok(ReconcileView::from(outcome))))
}

/// Run a deep consistency check; `repair=true` applies known-safe fixes.
/// This is the explicit repair action — the health endpoint never does
/// this work.
#[utoipa::path(
    post,
    path = "/sync/consistency/check",
    params(ConsistencyQuery),
    responses((status = 200, description = "Consistency report")),
    tag = "Sync Failures"
)]
pub async fn check_consistency(
    State(state): State<SyncApiState>,
    Query(query): Query<ConsistencyQuery>,
) -> ApiResult<Json<ApiResponse<ConsistencyReport>>> {
    let report = state.engine.check_consistency(query.repair).await?;
    Ok(Json(ApiResponse::ok(report)))
}

/// Posting outcome as rendered to the caller.
#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ReconcileView {
    pub property_appended: bool,
    pub company_appended: bool,
}

impl From<PostingOutcome> for ReconcileView {
    fn from(o: PostingOutcome) -> Self {
        Self {
            property_appended: o.property_appended,
            company_appended: o.company_appended,
        }
    }
}
