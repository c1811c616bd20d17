//! Handlers for schedule CRUD.

use axum::extract::{Path, State};
use axum::Json;
use propledger_sync::{ScheduleDescriptor, ScheduleFrequency};

use crate::error::{ApiResult, ApiSyncError};
use crate::models::{AddScheduleRequest, ApiResponse, UpdateScheduleRequest};
use crate::router::SyncApiState;

/// List all named schedules.
#[utoipa::path(
    get,
    path = "/sync/schedules",
    responses((status = 200, description = "Registered schedules")),
    tag = "Schedules"
)]
pub async fn list_schedules(
    State(state): State<SyncApiState>,
) -> Json<ApiResponse<Vec<ScheduleDescriptor>>> {
    Json(ApiResponse::ok(state.engine.schedules().list()))
}

/// Add an operator-defined schedule.
#[utoipa::path(
    post,
    path = "/sync/schedules",
    request_body = AddScheduleRequest,
    responses(
        (status = 200, description = "Schedule added"),
        (status = 400, description = "Invalid frequency or duplicate name")
    ),
    tag = "Schedules"
)]
pub async fn add_schedule(
    State(state): State<SyncApiState>,
    Json(request): Json<AddScheduleRequest>,
) -> ApiResult<Json<ApiResponse<ScheduleDescriptor>>> {
    if request.name.trim().is_empty() {
        return Err(ApiSyncError::Validation(
            "Schedule name must not be empty".to_string(),
        ));
    }
    let frequency: ScheduleFrequency = request
        .frequency
        .parse()
        .map_err(ApiSyncError::Validation)?;

    state.engine.add_schedule(
        &request.name,
        &request.description,
        frequency,
        request.pass,
        request.enabled,
    )?;

    let descriptor = state
        .engine
        .schedules()
        .get(&request.name)
        .ok_or_else(|| ApiSyncError::NotFound(format!("schedule {}", request.name)))?;
    Ok(Json(ApiResponse::ok(descriptor)))
}

/// Update a schedule's frequency; a running timer is restarted.
#[utoipa::path(
    put,
    path = "/sync/schedules/{name}",
    params(("name" = String, Path, description = "Schedule name")),
    request_body = UpdateScheduleRequest,
    responses(
        (status = 200, description = "Schedule updated"),
        (status = 400, description = "Unknown schedule or invalid frequency")
    ),
    tag = "Schedules"
)]
pub async fn update_schedule(
    State(state): State<SyncApiState>,
    Path(name): Path<String>,
    Json(request): Json<UpdateScheduleRequest>,
) -> ApiResult<Json<ApiResponse<ScheduleDescriptor>>> {
    let frequency: ScheduleFrequency = request
        .frequency
        .parse()
        .map_err(ApiSyncError::Validation)?;

    state.engine.schedules().update_frequency(&name, frequency)?;
    let descriptor = state
        .engine
        .schedules()
        .get(&name)
        .ok_or_else(|| ApiSyncError::NotFound(format!("schedule {name}")))?;
    Ok(Json(ApiResponse::ok(descriptor)))
}

/// Remove an operator-defined schedule, stopping its timer.
#[utoipa::path(
    delete,
    path = "/sync/schedules/{name}",
    params(("name" = String, Path, description = "Schedule name")),
    responses(
        (status = 200, description = "Schedule removed"),
        (status = 404, description = "Unknown schedule")
    ),
    tag = "Schedules"
)]
pub async fn remove_schedule(
    State(state): State<SyncApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ApiResponse<()>>> {
    if state.engine.schedules().remove(&name) {
        Ok(Json(ApiResponse::message("Schedule removed")))
    } else {
        Err(ApiSyncError::NotFound(format!("schedule {name}")))
    }
}

/// Enable (start) a schedule's timer.
#[utoipa::path(
    post,
    path = "/sync/schedules/{name}/enable",
    params(("name" = String, Path, description = "Schedule name")),
    responses((status = 200, description = "Schedule enabled")),
    tag = "Schedules"
)]
pub async fn enable_schedule(
    State(state): State<SyncApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ApiResponse<()>>> {
    state.engine.schedules().start(&name)?;
    Ok(Json(ApiResponse::message("Schedule enabled")))
}

/// Disable (stop) a schedule's timer at its next tick boundary.
#[utoipa::path(
    post,
    path = "/sync/schedules/{name}/disable",
    params(("name" = String, Path, description = "Schedule name")),
    responses((status = 200, description = "Schedule disabled")),
    tag = "Schedules"
)]
pub async fn disable_schedule(
    State(state): State<SyncApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ApiResponse<()>>> {
    state.engine.schedules().stop(&name)?;
    Ok(Json(ApiResponse::message("Schedule disabled")))
}

/// Start every registered schedule.
#[utoipa::path(
    post,
    path = "/sync/schedules/start-all",
    responses((status = 200, description = "All schedules started")),
    tag = "Schedules"
)]
pub async fn start_all_schedules(State(state): State<SyncApiState>) -> Json<ApiResponse<()>> {
    state.engine.schedules().start_all();
    Json(ApiResponse::message("All schedules started"))
}

/// Stop every registered schedule.
#[utoipa::path(
    post,
    path = "/sync/schedules/stop-all",
    responses((status = 200, description = "All schedules stopped")),
    tag = "Schedules"
)]
pub async fn stop_all_schedules(State(state): State<SyncApiState>) -> Json<ApiResponse<()>> {
    state.engine.schedules().stop_all();
    Json(ApiResponse::message("All schedules stopped"))
}
