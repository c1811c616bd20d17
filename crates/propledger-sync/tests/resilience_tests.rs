//! Integration tests for the resilience layer.
//!
//! Covers circuit breaker state transitions, fail-fast behavior while
//! open, reset semantics, and the retriability classification that drives
//! every retry decision.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use propledger_sync::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig, RetryExecutor, SyncError,
};

fn transient() -> SyncError {
    SyncError::Database(sqlx::Error::PoolTimedOut)
}

fn breaker(max_failures: u32, reset_secs: u64) -> CircuitBreaker {
    CircuitBreaker::new(CircuitBreakerConfig {
        max_failures,
        reset_timeout: Duration::from_secs(reset_secs),
    })
}

#[tokio::test]
async fn breaker_opens_after_five_consecutive_failures() {
    let cb = CircuitBreaker::with_defaults();

    for i in 0..4 {
        cb.record_failure().await;
        assert_eq!(
            cb.state().await,
            CircuitState::Closed,
            "should still be closed after {} failures",
            i + 1
        );
    }

    cb.record_failure().await;
    assert_eq!(cb.state().await, CircuitState::Open);
    assert!(!cb.is_allowed().await);
}

#[tokio::test]
async fn open_breaker_fails_fast_without_invoking_operation() {
    let cb = breaker(1, 60);
    let _ = cb
        .execute(|| async { Err::<(), _>(transient()) })
        .await;
    assert_eq!(cb.state().await, CircuitState::Open);

    let invocations = AtomicUsize::new(0);
    let result = cb
        .execute(|| {
            invocations.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, SyncError>(1) }
        })
        .await;

    assert!(matches!(result, Err(SyncError::CircuitOpen)));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn success_after_reset_timeout_closes_and_zeroes_failures() {
    let cb = breaker(1, 0);
    cb.record_failure().await;

    // Reset timeout elapsed (zero): the breaker probes in half-open.
    assert_eq!(cb.state().await, CircuitState::HalfOpen);

    let result = cb.execute(|| async { Ok::<_, SyncError>(42) }).await;
    assert_eq!(result.unwrap(), 42);
    assert_eq!(cb.state().await, CircuitState::Closed);
    assert_eq!(cb.failure_count(), 0);
}

#[tokio::test]
async fn success_resets_consecutive_failure_count() {
    let cb = CircuitBreaker::with_defaults();

    for _ in 0..4 {
        cb.record_failure().await;
    }
    cb.record_success().await;
    assert_eq!(cb.failure_count(), 0);

    for _ in 0..4 {
        cb.record_failure().await;
    }
    assert_eq!(cb.state().await, CircuitState::Closed);
}

#[tokio::test]
async fn retry_executor_gives_up_after_max_retries() {
    let executor = RetryExecutor::new(RetryConfig {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        jitter: false,
    });

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = attempts.clone();
    let result: Result<(), _> = executor
        .execute(move || {
            attempts_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;

    assert!(result.is_err());
    // Initial attempt plus two retries.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn duplicate_key_is_never_retriable() {
    // A duplicate key means the write already happened; retrying would be
    // wrong. Exercised through the classifier contract on errors sqlx can
    // produce without a live database.
    let validation = SyncError::Validation("bad".to_string());
    assert!(!validation.is_retriable());

    let not_found = SyncError::EntityNotFound {
        kind: "payment",
        id: uuid::Uuid::new_v4(),
    };
    assert!(!not_found.is_retriable());
}

#[test]
fn network_and_timeout_errors_are_always_retriable() {
    assert!(SyncError::Database(sqlx::Error::PoolTimedOut).is_retriable());

    let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout");
    assert!(SyncError::Database(sqlx::Error::Io(io)).is_retriable());

    let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
    assert!(SyncError::Database(sqlx::Error::Io(reset)).is_retriable());
}

#[test]
fn failure_details_carry_classification() {
    let details = transient().failure_details();
    assert!(details.retriable);
    assert_eq!(details.name, "database");
    assert!(details.labels.contains(&"transient".to_string()));

    let details = SyncError::Validation("nope".to_string()).failure_details();
    assert!(!details.retriable);
    assert_eq!(details.name, "validation");
}
