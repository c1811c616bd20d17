//! Error types for the sync engine, with retriability classification.
//!
//! The classification drives every retry decision in the system: transient
//! infrastructure errors are retried with backoff, duplicate-key and
//! validation errors fail fast, and a circuit-open rejection is distinct
//! from a genuine operation failure.

use propledger_db::models::FailureDetails;
use propledger_db::DbError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors produced by the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Raw database error from either store.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Wrapped database-layer error.
    #[error(transparent)]
    Db(#[from] DbError),

    /// The circuit breaker is open; the operation was not attempted.
    #[error("Circuit breaker open; operation rejected")]
    CircuitOpen,

    /// The store's change feed cannot be established in this deployment.
    /// Not an error state: the detector falls back to polling.
    #[error("Change feed unsupported: {reason}")]
    ChangeFeedUnsupported { reason: String },

    /// Input failed validation; never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    EntityNotFound { kind: &'static str, id: Uuid },

    /// Post-hoc verification found no ledger posting for a payment that
    /// should have one. Retriable: the backlog drain re-posts it.
    #[error("Ledger posting missing for payment {payment_id}")]
    PostingIncomplete { payment_id: Uuid },

    /// A maintenance operation name with no registered implementation.
    #[error("Unknown maintenance operation: {0}")]
    UnknownOperation(String),

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Transient SQLSTATE classes: connection failures (08xxx), serialization
/// failure, deadlock, and statement/lock timeouts.
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "40001" | "40P01" | "55P03" | "57014")
}

fn sqlx_is_retriable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Protocol(_)
        | sqlx::Error::Tls(_) => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|c| is_transient_sqlstate(c.as_ref()))
            .unwrap_or(false),
        _ => false,
    }
}

fn sqlx_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|c| c.to_string()),
        _ => None,
    }
}

impl SyncError {
    /// Whether a retry of the failed operation can reasonably succeed.
    ///
    /// Duplicate-key violations are NEVER retriable: the write already
    /// happened (idempotency signal) or is a genuine conflict — either way
    /// retrying would be wrong.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            SyncError::Database(e) => sqlx_is_retriable(e),
            SyncError::Db(DbError::ConnectionFailed(_)) => true,
            SyncError::Db(DbError::QueryFailed(e)) => sqlx_is_retriable(e),
            SyncError::Db(_) => false,
            SyncError::CircuitOpen => false,
            SyncError::ChangeFeedUnsupported { .. } => false,
            SyncError::Validation(_) => false,
            SyncError::EntityNotFound { .. } => false,
            SyncError::PostingIncomplete { .. } => true,
            SyncError::UnknownOperation(_) => false,
            SyncError::Serialization(_) => false,
        }
    }

    /// Whether this is a unique-constraint (duplicate key) violation.
    #[must_use]
    pub fn is_duplicate_key(&self) -> bool {
        let code = match self {
            SyncError::Database(e) => sqlx_code(e),
            SyncError::Db(DbError::QueryFailed(e)) => sqlx_code(e),
            _ => None,
        };
        code.as_deref() == Some("23505")
    }

    /// Short stable name for the failure ledger.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SyncError::Database(_) | SyncError::Db(_) => "database",
            SyncError::CircuitOpen => "circuit_open",
            SyncError::ChangeFeedUnsupported { .. } => "change_feed_unsupported",
            SyncError::Validation(_) => "validation",
            SyncError::EntityNotFound { .. } => "entity_not_found",
            SyncError::PostingIncomplete { .. } => "posting_incomplete",
            SyncError::UnknownOperation(_) => "unknown_operation",
            SyncError::Serialization(_) => "serialization",
        }
    }

    /// SQLSTATE code, when the error carries one.
    #[must_use]
    pub fn code(&self) -> Option<String> {
        match self {
            SyncError::Database(e) => sqlx_code(e),
            SyncError::Db(DbError::QueryFailed(e)) => sqlx_code(e),
            _ => None,
        }
    }

    /// Classified details for the failure ledger.
    #[must_use]
    pub fn failure_details(&self) -> FailureDetails {
        let mut labels = Vec::new();
        if self.is_retriable() {
            labels.push("transient".to_string());
        }
        if self.is_duplicate_key() {
            labels.push("duplicate_key".to_string());
        }
        FailureDetails {
            name: self.name().to_string(),
            code: self.code(),
            message: self.to_string(),
            labels,
            retriable: self.is_retriable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_are_retriable() {
        let err = SyncError::Database(sqlx::Error::PoolTimedOut);
        assert!(err.is_retriable());

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = SyncError::Database(sqlx::Error::Io(io));
        assert!(err.is_retriable());
    }

    #[test]
    fn test_validation_never_retriable() {
        let err = SyncError::Validation("amount must be non-negative".to_string());
        assert!(!err.is_retriable());
        assert!(!err.is_duplicate_key());
    }

    #[test]
    fn test_circuit_open_not_retriable() {
        assert!(!SyncError::CircuitOpen.is_retriable());
    }

    #[test]
    fn test_feed_unsupported_not_retriable() {
        let err = SyncError::ChangeFeedUnsupported {
            reason: "trigger function not installed".to_string(),
        };
        assert!(!err.is_retriable());
        assert_eq!(err.name(), "change_feed_unsupported");
    }

    #[test]
    fn test_transient_sqlstates() {
        assert!(is_transient_sqlstate("08006"));
        assert!(is_transient_sqlstate("40001"));
        assert!(is_transient_sqlstate("40P01"));
        assert!(is_transient_sqlstate("57014"));
        assert!(!is_transient_sqlstate("23505"));
        assert!(!is_transient_sqlstate("42601"));
    }

    #[test]
    fn test_failure_details_shape() {
        let err = SyncError::Validation("bad input".to_string());
        let details = err.failure_details();
        assert_eq!(details.name, "validation");
        assert!(!details.retriable);
        assert!(details.code.is_none());
        assert!(details.labels.is_empty());

        let details = SyncError::Database(sqlx::Error::PoolTimedOut).failure_details();
        assert!(details.retriable);
        assert_eq!(details.labels, vec!["transient".to_string()]);
    }
}
