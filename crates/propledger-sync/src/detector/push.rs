//! Push-mode detection via the store's change feed.
//!
//! Subscribes to the `propledger_changes` LISTEN channel fed by row
//! triggers on the watched tables. Requires the trigger function to be
//! installed; deployments without it raise the feed-unsupported condition
//! and the factory falls back to polling.

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{parse_notification, ChangeEvent, DetectionMode, DetectionStrategy};
use crate::error::{SyncError, SyncResult};

/// The LISTEN channel the change-feed triggers publish on.
pub const CHANGE_CHANNEL: &str = "propledger_changes";

/// The trigger function whose presence marks the feed as supported.
const FEED_FUNCTION: &str = "propledger_notify_change";

/// Push-based change detection.
pub struct PushDetector {
    ops: PgPool,
}

impl PushDetector {
    /// Create a push detector over the operational store.
    #[must_use]
    pub fn new(ops: PgPool) -> Self {
        Self { ops }
    }

    /// Verify the deployment can provide the change feed.
    async fn verify_feed_support(&self) -> SyncResult<()> {
        let installed: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS (SELECT 1 FROM pg_proc WHERE proname = $1)
            ",
        )
        .bind(FEED_FUNCTION)
        .fetch_one(&self.ops)
        .await?;

        if installed {
            Ok(())
        } else {
            Err(SyncError::ChangeFeedUnsupported {
                reason: format!("trigger function {FEED_FUNCTION} is not installed"),
            })
        }
    }
}

#[async_trait]
impl DetectionStrategy for PushDetector {
    fn mode(&self) -> DetectionMode {
        DetectionMode::Push
    }

    async fn start(
        &self,
        events: mpsc::Sender<ChangeEvent>,
        shutdown: CancellationToken,
    ) -> SyncResult<Vec<JoinHandle<()>>> {
        self.verify_feed_support().await?;

        let mut listener = PgListener::connect_with(&self.ops)
            .await
            .map_err(SyncError::Database)?;
        listener
            .listen(CHANGE_CHANNEL)
            .await
            .map_err(SyncError::Database)?;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    notification = listener.recv() => match notification {
                        Ok(n) => match parse_notification(n.payload()) {
                            Ok(Some(event)) => {
                                debug!(?event, "Change feed event");
                                if events.send(event).await.is_err() {
                                    // Receiver gone: engine is shutting down.
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!(error = %e, payload = n.payload(), "Ignoring malformed change notification");
                            }
                        },
                        Err(e) => {
                            // PgListener reconnects internally on the next
                            // recv; pace the loop while the store is down.
                            warn!(error = %e, "Change feed receive error");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }
            }
            debug!("Push detector stopped");
        });

        Ok(vec![task])
    }
}
