//! Change detection over the operational store.
//!
//! Two mutually exclusive strategies selected once at startup: push mode
//! subscribes to the store's change feed (LISTEN/NOTIFY fed by row
//! triggers); poll mode falls back to `updated_at`-window timers when the
//! feed cannot be established. Both feed the same channel, so downstream
//! posting is agnostic to the active strategy.

mod poll;
mod push;

pub use poll::PollDetector;
pub use push::PushDetector;

use async_trait::async_trait;
use propledger_db::models::EntityKind;
use serde::Deserialize;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};

/// What happened to a watched row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Inserted,
    Updated,
    Deleted,
}

/// A detected change, closed over the three watched entity kinds.
/// Dispatch sites match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Payment { action: ChangeAction, id: Uuid },
    Property { action: ChangeAction, id: Uuid },
    User { action: ChangeAction, id: Uuid },
}

impl ChangeEvent {
    /// The entity kind of this event.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            ChangeEvent::Payment { .. } => EntityKind::Payment,
            ChangeEvent::Property { .. } => EntityKind::Property,
            ChangeEvent::User { .. } => EntityKind::User,
        }
    }

    /// The entity id of this event.
    #[must_use]
    pub fn entity_id(&self) -> Uuid {
        match self {
            ChangeEvent::Payment { id, .. }
            | ChangeEvent::Property { id, .. }
            | ChangeEvent::User { id, .. } => *id,
        }
    }

    /// The action of this event.
    #[must_use]
    pub fn action(&self) -> ChangeAction {
        match self {
            ChangeEvent::Payment { action, .. }
            | ChangeEvent::Property { action, .. }
            | ChangeEvent::User { action, .. } => *action,
        }
    }
}

/// Wire shape of a change-feed notification payload.
#[derive(Debug, Deserialize)]
struct NotifyPayload {
    table: String,
    action: String,
    id: Uuid,
}

/// Parse a change-feed notification payload into a typed event.
///
/// Unknown tables are not an error — the trigger may be installed on
/// tables this engine does not watch — so the result is optional.
pub fn parse_notification(payload: &str) -> SyncResult<Option<ChangeEvent>> {
    let wire: NotifyPayload = serde_json::from_str(payload)?;

    let action = match wire.action.as_str() {
        "INSERT" => ChangeAction::Inserted,
        "UPDATE" => ChangeAction::Updated,
        "DELETE" => ChangeAction::Deleted,
        other => {
            return Err(SyncError::Validation(format!(
                "Unknown change action: {other}"
            )))
        }
    };

    let event = match wire.table.as_str() {
        "payments" => Some(ChangeEvent::Payment {
            action,
            id: wire.id,
        }),
        "properties" => Some(ChangeEvent::Property {
            action,
            id: wire.id,
        }),
        "users" => Some(ChangeEvent::User {
            action,
            id: wire.id,
        }),
        _ => None,
    };

    Ok(event)
}

/// Which detection strategy is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    Push,
    Poll,
}

impl std::fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionMode::Push => write!(f, "push"),
            DetectionMode::Poll => write!(f, "poll"),
        }
    }
}

/// A running detection strategy.
///
/// `start` must verify feed support before spawning anything and fail with
/// [`SyncError::ChangeFeedUnsupported`] when the deployment cannot provide
/// the feed, so the factory can fall back.
#[async_trait]
pub trait DetectionStrategy: Send + Sync {
    /// The mode this strategy implements.
    fn mode(&self) -> DetectionMode;

    /// Start the strategy's background tasks.
    async fn start(
        &self,
        events: mpsc::Sender<ChangeEvent>,
        shutdown: CancellationToken,
    ) -> SyncResult<Vec<JoinHandle<()>>>;
}

/// Handle to the running detector.
pub struct DetectorHandle {
    /// The strategy that ended up active.
    pub mode: DetectionMode,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl DetectorHandle {
    /// Stop detection; tasks exit at their next tick boundary.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Start detection: attempt push mode first, fall back to polling only on
/// the specific feed-unsupported condition. Any other setup error is fatal
/// to the start operation.
pub async fn start_detector(
    ops: PgPool,
    config: &EngineConfig,
    events: mpsc::Sender<ChangeEvent>,
) -> SyncResult<DetectorHandle> {
    let shutdown = CancellationToken::new();

    let push = PushDetector::new(ops.clone());
    match push.start(events.clone(), shutdown.clone()).await {
        Ok(tasks) => {
            info!("Change detection started in push mode");
            return Ok(DetectorHandle {
                mode: DetectionMode::Push,
                shutdown,
                tasks,
            });
        }
        Err(SyncError::ChangeFeedUnsupported { reason }) => {
            warn!(
                reason = %reason,
                "Change feed unavailable; falling back to poll mode (degraded)"
            );
        }
        Err(e) => return Err(e),
    }

    let poll = PollDetector::new(ops, config);
    let tasks = poll.start(events, shutdown.clone()).await?;
    info!("Change detection started in poll mode");
    Ok(DetectorHandle {
        mode: DetectionMode::Poll,
        shutdown,
        tasks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payment_insert() {
        let id = Uuid::new_v4();
        let payload = format!(r#"{{"table":"payments","action":"INSERT","id":"{id}"}}"#);
        let event = parse_notification(&payload).unwrap().unwrap();
        assert_eq!(
            event,
            ChangeEvent::Payment {
                action: ChangeAction::Inserted,
                id
            }
        );
        assert_eq!(event.kind(), EntityKind::Payment);
        assert_eq!(event.entity_id(), id);
    }

    #[test]
    fn test_parse_property_delete() {
        let id = Uuid::new_v4();
        let payload = format!(r#"{{"table":"properties","action":"DELETE","id":"{id}"}}"#);
        let event = parse_notification(&payload).unwrap().unwrap();
        assert_eq!(event.action(), ChangeAction::Deleted);
        assert_eq!(event.kind(), EntityKind::Property);
    }

    #[test]
    fn test_parse_unwatched_table_is_none() {
        let payload = format!(
            r#"{{"table":"leases","action":"UPDATE","id":"{}"}}"#,
            Uuid::new_v4()
        );
        assert!(parse_notification(&payload).unwrap().is_none());
    }

    #[test]
    fn test_parse_unknown_action_is_error() {
        let payload = format!(
            r#"{{"table":"payments","action":"TRUNCATE","id":"{}"}}"#,
            Uuid::new_v4()
        );
        assert!(parse_notification(&payload).is_err());
    }

    #[test]
    fn test_parse_malformed_json_is_error() {
        assert!(parse_notification("not json").is_err());
    }

    #[test]
    fn test_detection_mode_display() {
        assert_eq!(DetectionMode::Push.to_string(), "push");
        assert_eq!(DetectionMode::Poll.to_string(), "poll");
    }
}
