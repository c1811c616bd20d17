//! Resilience patterns for store operations.
//!
//! Provides circuit breaker and retry logic with backoff. This layer has
//! no domain knowledge; every write path in the engine goes through it.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Tripped; operations rejected immediately.
    Open,
    /// Testing recovery; operations allowed through as probes.
    HalfOpen,
}

impl CircuitState {
    /// Whether operations may proceed in this state.
    #[must_use]
    pub fn allows_operations(&self) -> bool {
        !matches!(self, CircuitState::Open)
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub max_failures: u32,
    /// Duration the circuit stays open before transitioning to half-open.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker shared by the engine's store operations.
///
/// Opens after `max_failures` consecutive failures; while open, `execute`
/// rejects immediately without attempting the operation, shedding load from
/// a degraded store. A single success closes the circuit and resets the
/// failure count.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    opened_at_unix: AtomicU64,
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            opened_at_unix: AtomicU64::new(0),
        }
    }

    /// Create a new circuit breaker with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Current state, applying the open → half-open transition when the
    /// reset timeout has elapsed.
    pub async fn state(&self) -> CircuitState {
        self.maybe_transition_to_half_open().await;
        *self.state.read().await
    }

    /// Current consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    /// Check if operations are currently allowed.
    pub async fn is_allowed(&self) -> bool {
        self.state().await.allows_operations()
    }

    /// Record a successful operation.
    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                debug!("Circuit breaker closed after successful probe");
                *state = CircuitState::Closed;
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed operation.
    pub async fn record_failure(&self) {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::Closed => {
                let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.config.max_failures {
                    warn!(
                        failures = count,
                        threshold = self.config.max_failures,
                        "Circuit breaker opened after consecutive failures"
                    );
                    *state = CircuitState::Open;
                    self.opened_at_unix.store(now_unix(), Ordering::SeqCst);
                }
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker reopened after failed probe");
                *state = CircuitState::Open;
                self.opened_at_unix.store(now_unix(), Ordering::SeqCst);
            }
            CircuitState::Open => {
                self.opened_at_unix.store(now_unix(), Ordering::SeqCst);
            }
        }
    }

    async fn maybe_transition_to_half_open(&self) {
        {
            let state = self.state.read().await;
            if *state != CircuitState::Open {
                return;
            }
        }

        let opened_at = self.opened_at_unix.load(Ordering::SeqCst);
        if now_unix().saturating_sub(opened_at) >= self.config.reset_timeout.as_secs() {
            let mut state = self.state.write().await;
            if *state == CircuitState::Open {
                debug!("Circuit breaker transitioning to half-open");
                *state = CircuitState::HalfOpen;
            }
        }
    }

    /// Execute an operation under circuit protection.
    ///
    /// While open, fails immediately with [`SyncError::CircuitOpen`]
    /// without invoking the operation. Only retriable (transient) errors
    /// count toward opening the circuit; a validation error is not a sign
    /// of a degraded dependency.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> SyncResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        if !self.is_allowed().await {
            return Err(SyncError::CircuitOpen);
        }

        match operation().await {
            Ok(result) => {
                self.record_success().await;
                Ok(result)
            }
            Err(e) => {
                if e.is_retriable() {
                    self.record_failure().await;
                }
                Err(e)
            }
        }
    }

    /// Reset to closed state.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        *state = CircuitState::Closed;
        self.failure_count.store(0, Ordering::SeqCst);
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay; attempt N waits `base_delay × (N + 1)`.
    pub base_delay: Duration,
    /// Ceiling on the computed delay.
    pub max_delay: Duration,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

/// Retry executor with backoff.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor with the given configuration.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a new retry executor with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Delay before retrying after the given 0-indexed attempt.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let scaled = self.config.base_delay.as_millis() as f64 * f64::from(attempt + 1);
        let capped = scaled.min(self.config.max_delay.as_millis() as f64);

        let final_delay = if self.config.jitter {
            // Up to 25% jitter
            capped * (1.0 + rand_simple() * 0.25)
        } else {
            capped
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Execute an operation, retrying retriable failures with backoff.
    /// Non-retriable errors (duplicate key, validation) fail fast.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_retriable() || attempt >= self.config.max_retries {
                        return Err(e);
                    }

                    let delay = self.calculate_delay(attempt);
                    debug!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Execute with retries and circuit breaker protection. A circuit-open
    /// rejection is returned immediately; retrying against an open circuit
    /// is pointless.
    pub async fn execute_with_circuit_breaker<F, Fut, T>(
        &self,
        breaker: &CircuitBreaker,
        mut operation: F,
    ) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match breaker.execute(&mut operation).await {
                Ok(result) => return Ok(result),
                Err(SyncError::CircuitOpen) => return Err(SyncError::CircuitOpen),
                Err(e) => {
                    if !e.is_retriable() || attempt >= self.config.max_retries {
                        return Err(e);
                    }

                    let delay = self.calculate_delay(attempt);
                    debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Simple pseudo-random number generator for jitter.
/// Not cryptographically secure, but sufficient for jitter.
fn rand_simple() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64,
    );
    (hasher.finish() as f64) / (u64::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn transient_error() -> SyncError {
        SyncError::Database(sqlx::Error::PoolTimedOut)
    }

    #[tokio::test]
    async fn test_breaker_starts_closed() {
        let cb = CircuitBreaker::with_defaults();
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.is_allowed().await);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_max_failures() {
        let cb = CircuitBreaker::with_defaults();
        for _ in 0..4 {
            cb.record_failure().await;
        }
        assert_eq!(cb.state().await, CircuitState::Closed);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.is_allowed().await);
    }

    #[tokio::test]
    async fn test_breaker_rejects_without_invoking_when_open() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            max_failures: 1,
            reset_timeout: Duration::from_secs(60),
        });
        let _ = cb
            .execute(|| async { Err::<(), _>(transient_error()) })
            .await;
        assert_eq!(cb.state().await, CircuitState::Open);

        let calls = AtomicUsize::new(0);
        let result = cb
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, SyncError>(42) }
            })
            .await;

        assert!(matches!(result, Err(SyncError::CircuitOpen)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::with_defaults();
        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.failure_count(), 2);

        cb.record_success().await;
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_on_success() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            max_failures: 1,
            reset_timeout: Duration::from_secs(0),
        });
        cb.record_failure().await;

        // Zero reset timeout: next state read transitions to half-open.
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_half_open_probe_reopens_on_failure() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            max_failures: 1,
            reset_timeout: Duration::from_secs(0),
        });
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_failure().await;
        // opened_at is refreshed, but with a zero timeout the breaker
        // re-enters half-open on the next read; verify via raw state.
        assert_eq!(*cb.state.read().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_breaker_ignores_non_transient_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            max_failures: 1,
            reset_timeout: Duration::from_secs(60),
        });
        let _ = cb
            .execute(|| async {
                Err::<(), _>(SyncError::Validation("bad".to_string()))
            })
            .await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let executor = RetryExecutor::with_defaults();
        let calls = AtomicUsize::new(0);

        let result = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, SyncError>(7) }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_retries_transient_errors() {
        let executor = RetryExecutor::new(RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = executor
            .execute(move || {
                let n = calls_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(transient_error())
                    } else {
                        Ok(99)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_fails_fast_on_non_retriable() {
        let executor = RetryExecutor::with_defaults();
        let calls = AtomicUsize::new(0);

        let result: SyncResult<()> = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Validation("no".to_string())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_scales_linearly_with_attempt() {
        let executor = RetryExecutor::new(RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: false,
        });

        assert_eq!(executor.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(executor.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(executor.calculate_delay(2), Duration::from_millis(300));
    }

    #[test]
    fn test_delay_respects_max() {
        let executor = RetryExecutor::new(RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_millis(500),
            jitter: false,
        });

        assert_eq!(executor.calculate_delay(9), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_retry_with_breaker_stops_on_open_circuit() {
        let executor = RetryExecutor::new(RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: false,
        });
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            max_failures: 2,
            reset_timeout: Duration::from_secs(60),
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: SyncResult<()> = executor
            .execute_with_circuit_breaker(&cb, move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(transient_error()) }
            })
            .await;

        // Two real attempts open the circuit; the third is rejected
        // without invoking the operation.
        assert!(matches!(result, Err(SyncError::CircuitOpen)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
