//! API error types for sync endpoints.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use propledger_sync::SyncError;
use thiserror::Error;

use crate::models::ApiResponse;

/// Result type for sync API handlers.
pub type ApiResult<T> = Result<T, ApiSyncError>;

/// Sync API error type.
#[derive(Debug, Error)]
pub enum ApiSyncError {
    /// Engine error.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Raw database error from listing endpoints.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl ApiSyncError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiSyncError::Sync(SyncError::Validation(_)) | ApiSyncError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiSyncError::Sync(SyncError::EntityNotFound { .. }) | ApiSyncError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ApiSyncError::Sync(SyncError::CircuitOpen) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiSyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Sync API request failed");
        }
        let body = ApiResponse::<()>::failure(self.to_string());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiSyncError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiSyncError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiSyncError::Sync(SyncError::CircuitOpen).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiSyncError::Database(sqlx::Error::PoolTimedOut).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
