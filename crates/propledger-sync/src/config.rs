//! Engine configuration.

/// Tunables for the sync engine. Defaults match the deployment the system
/// was designed for; everything is overridable from the application config.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Payments polling interval in poll mode (seconds).
    pub poll_payments_secs: u64,
    /// Properties polling interval in poll mode (seconds).
    pub poll_properties_secs: u64,
    /// Users polling interval in poll mode (seconds).
    pub poll_users_secs: u64,
    /// Ledger-event backlog drain interval (seconds), active in both modes.
    pub backlog_drain_secs: u64,
    /// Backlog drain batch cap.
    pub backlog_batch_size: i64,
    /// Consistency lookback window in days.
    pub lookback_days: i64,
    /// Quick-mode consistency check timeout (seconds).
    pub quick_check_timeout_secs: u64,
    /// Failure-reprocessing batch cap.
    pub failure_batch_size: i64,
    /// Base backoff for failure rescheduling (seconds).
    pub failure_base_backoff_secs: i64,
    /// Hard ceiling on failure retry attempts.
    pub failure_max_attempts: i32,
    /// Maintenance queue poll interval (seconds).
    pub queue_poll_secs: u64,
    /// Maintenance job lease duration (seconds).
    pub queue_lease_secs: i64,
    /// Base backoff for maintenance job requeue (seconds).
    pub queue_base_backoff_secs: i64,
    /// Batch size for full-sync payment iteration.
    pub full_sync_batch_size: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_payments_secs: 30,
            poll_properties_secs: 60,
            poll_users_secs: 120,
            backlog_drain_secs: 15,
            backlog_batch_size: 25,
            lookback_days: 30,
            quick_check_timeout_secs: 5,
            failure_batch_size: 50,
            failure_base_backoff_secs: 60,
            failure_max_attempts: 10,
            queue_poll_secs: 5,
            queue_lease_secs: 120,
            queue_base_backoff_secs: 30,
            full_sync_batch_size: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_design() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_payments_secs, 30);
        assert_eq!(config.poll_properties_secs, 60);
        assert_eq!(config.poll_users_secs, 120);
        assert_eq!(config.backlog_drain_secs, 15);
        assert_eq!(config.lookback_days, 30);
        assert_eq!(config.failure_max_attempts, 10);
        assert_eq!(config.queue_poll_secs, 5);
        assert_eq!(config.queue_lease_secs, 120);
    }
}
