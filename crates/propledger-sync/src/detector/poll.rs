//! Poll-mode detection fallback.
//!
//! Three independent timers (payments, properties, users), each querying
//! the rows whose `updated_at` falls within its own window and re-deriving
//! the same event semantics as push mode. Deletions are not observable by
//! polling; the consistency checker closes that gap.

use chrono::{DateTime, Utc};
use std::time::Duration;

use async_trait::async_trait;
use propledger_db::models::{EntityKind, OperationalUser, Payment, Property};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ChangeAction, ChangeEvent, DetectionMode, DetectionStrategy};
use crate::config::EngineConfig;
use crate::error::SyncResult;

/// Poll-based change detection.
pub struct PollDetector {
    ops: PgPool,
    payments_secs: u64,
    properties_secs: u64,
    users_secs: u64,
}

async fn fetch_changed_ids(
    ops: &PgPool,
    kind: EntityKind,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Uuid>, sqlx::Error> {
    match kind {
        EntityKind::Payment => Ok(Payment::list_updated_between(ops, from, to)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect()),
        EntityKind::Property => Ok(Property::list_updated_between(ops, from, to)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect()),
        EntityKind::User => Ok(OperationalUser::list_updated_between(ops, from, to)
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect()),
    }
}

/// Polling observes rows, not operations: every returned row is treated as
/// an upsert, exactly how the downstream handler treats push-mode inserts
/// and updates.
fn event_for(kind: EntityKind, id: Uuid) -> ChangeEvent {
    let action = ChangeAction::Updated;
    match kind {
        EntityKind::Payment => ChangeEvent::Payment { action, id },
        EntityKind::Property => ChangeEvent::Property { action, id },
        EntityKind::User => ChangeEvent::User { action, id },
    }
}

impl PollDetector {
    /// Create a poll detector with the configured per-kind intervals.
    #[must_use]
    pub fn new(ops: PgPool, config: &EngineConfig) -> Self {
        Self {
            ops,
            payments_secs: config.poll_payments_secs,
            properties_secs: config.poll_properties_secs,
            users_secs: config.poll_users_secs,
        }
    }

    fn spawn_timer(
        &self,
        kind: EntityKind,
        period_secs: u64,
        events: mpsc::Sender<ChangeEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let ops = self.ops.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(period_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut window_start = Utc::now();

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let window_end = Utc::now();
                        match fetch_changed_ids(&ops, kind, window_start, window_end).await {
                            Ok(ids) => {
                                if !ids.is_empty() {
                                    debug!(timer = %kind, changes = ids.len(), "Poll window produced changes");
                                }
                                for id in ids {
                                    if events.send(event_for(kind, id)).await.is_err() {
                                        // Receiver gone: engine shutting down.
                                        return;
                                    }
                                }
                                window_start = window_end;
                            }
                            Err(e) => {
                                // Window is not advanced: the next tick
                                // re-scans the same range.
                                warn!(timer = %kind, error = %e, "Poll query failed");
                            }
                        }
                    }
                }
            }
            debug!(timer = %kind, "Poll timer stopped");
        })
    }
}

#[async_trait]
impl DetectionStrategy for PollDetector {
    fn mode(&self) -> DetectionMode {
        DetectionMode::Poll
    }

    async fn start(
        &self,
        events: mpsc::Sender<ChangeEvent>,
        shutdown: CancellationToken,
    ) -> SyncResult<Vec<JoinHandle<()>>> {
        Ok(vec![
            self.spawn_timer(
                EntityKind::Payment,
                self.payments_secs,
                events.clone(),
                shutdown.clone(),
            ),
            self.spawn_timer(
                EntityKind::Property,
                self.properties_secs,
                events.clone(),
                shutdown.clone(),
            ),
            self.spawn_timer(EntityKind::User, self.users_secs, events, shutdown),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_events_are_upserts() {
        let id = Uuid::new_v4();
        assert_eq!(
            event_for(EntityKind::Payment, id),
            ChangeEvent::Payment {
                action: ChangeAction::Updated,
                id
            }
        );
        assert_eq!(event_for(EntityKind::User, id).kind(), EntityKind::User);
    }
}
