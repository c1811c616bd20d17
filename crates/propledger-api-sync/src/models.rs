//! Request/response DTOs for the sync API.

use chrono::{DateTime, Utc};
use propledger_sync::SchedulePass;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Uniform response envelope for every sync endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Successful response carrying data.
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    /// Successful response carrying data and a message.
    #[must_use]
    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }

    /// Successful response with only a message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Failed response with a message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

/// Response to starting synchronization.
#[derive(Debug, Serialize, ToSchema)]
pub struct StartSyncResponse {
    /// Which detection strategy ended up active.
    pub detection_mode: String,
}

/// Response to kicking off a full sync.
#[derive(Debug, Serialize, ToSchema)]
pub struct FullSyncResponse {
    pub job_id: Uuid,
}

/// Query for the health endpoint.
#[derive(Debug, Deserialize, IntoParams)]
pub struct HealthQuery {
    /// Run the full audit instead of the timeout-bounded quick check.
    #[serde(default)]
    pub deep: bool,
}

/// Query for listing sync failures.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListFailuresQuery {
    /// Filter by status (pending, resolved, discarded).
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Query for the consistency check endpoint.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ConsistencyQuery {
    /// Apply known-safe automatic fixes.
    #[serde(default)]
    pub repair: bool,
}

/// Request to add a named schedule.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AddScheduleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Frequency, e.g. "every_5m", "hourly", "daily@02", "weekly@0@03",
    /// "monthly@1@04".
    pub frequency: String,
    /// Which engine pass the schedule runs.
    #[schema(value_type = String)]
    pub pass: SchedulePass,
    /// Start the schedule immediately.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Request to update a schedule's frequency.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateScheduleRequest {
    pub frequency: String,
}

/// Request to enqueue a maintenance job.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EnqueueJobRequest {
    /// Operation name (e.g. "sync_property_accounts").
    pub operation: String,
    pub company_id: Uuid,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: Option<serde_json::Value>,
}

/// Query for listing maintenance jobs.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListJobsQuery {
    pub company_id: Uuid,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Sync failure as rendered to operators (raw errors stay internal).
#[derive(Debug, Serialize, ToSchema)]
pub struct FailureView {
    pub entity_kind: String,
    pub entity_id: Uuid,
    pub error_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub error_message: String,
    pub retriable: bool,
    pub status: String,
    pub attempt_count: i32,
    pub last_error_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl From<propledger_db::models::SyncFailure> for FailureView {
    fn from(f: propledger_db::models::SyncFailure) -> Self {
        Self {
            entity_kind: f.entity_kind.to_string(),
            entity_id: f.entity_id,
            error_name: f.error_name,
            error_code: f.error_code,
            error_message: f.error_message,
            retriable: f.retriable,
            status: f.status.to_string(),
            attempt_count: f.attempt_count,
            last_error_at: f.last_error_at,
            next_attempt_at: f.next_attempt_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shapes() {
        let ok = ApiResponse::ok(5);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "data": 5}));

        let failure = ApiResponse::<()>::failure("boom");
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"success": false, "message": "boom"})
        );

        let msg = ApiResponse::<()>::message("stopped");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "stopped");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_add_schedule_request_defaults() {
        let req: AddScheduleRequest = serde_json::from_str(
            r#"{"name":"night_audit","frequency":"daily@01","pass":"audit"}"#,
        )
        .unwrap();
        assert!(req.enabled);
        assert!(req.description.is_empty());
        assert_eq!(req.pass, SchedulePass::Audit);
    }
}
