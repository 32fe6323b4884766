//! Best-effort delivery of upload notifications to live client sessions.

use crate::sessions::SessionRegistry;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of pushing a payload to one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The session no longer exists on the push side
    Gone,
}

/// Transport that delivers bytes to a push session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushEndpoint: Send + Sync {
    async fn send(&self, session_id: &str, payload: Vec<u8>) -> Result<PushOutcome>;
}

/// Payload pushed to the uploader
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub message: String,
}

/// Per-call delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub gone: usize,
    pub failed: usize,
}

/// Fans a notification out to every session registered for an owner.
///
/// Never fails: lookup and push errors are logged and counted.
pub struct NotificationDispatcher {
    sessions: Arc<dyn SessionRegistry>,
    endpoint: Arc<dyn PushEndpoint>,
    prune_stale_sessions: bool,
}

impl NotificationDispatcher {
    pub fn new(
        sessions: Arc<dyn SessionRegistry>,
        endpoint: Arc<dyn PushEndpoint>,
        prune_stale_sessions: bool,
    ) -> Self {
        Self {
            sessions,
            endpoint,
            prune_stale_sessions,
        }
    }

    #[instrument(skip(self, notification))]
    pub async fn notify(&self, owner: &str, notification: &Notification) -> DispatchReport {
        let mut report = DispatchReport::default();

        let payload = match serde_json::to_vec(notification) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to serialize notification");
                report.failed += 1;
                return report;
            }
        };

        let session_ids = match self.sessions.query_by_owner(owner).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to look up push sessions");
                report.failed += 1;
                return report;
            }
        };

        if session_ids.is_empty() {
            debug!("No live sessions for owner");
            return report;
        }

        for session_id in &session_ids {
            match self.endpoint.send(session_id, payload.clone()).await {
                Ok(PushOutcome::Delivered) => {
                    report.delivered += 1;
                    metrics::counter!("photos.notifications.delivered").increment(1);
                }
                Ok(PushOutcome::Gone) => {
                    info!(session_id = %session_id, "Push session is gone, skipping");
                    report.gone += 1;
                    metrics::counter!("photos.notifications.gone").increment(1);
                    self.prune(session_id).await;
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Failed to push notification");
                    report.failed += 1;
                    metrics::counter!("photos.notifications.failed").increment(1);
                }
            }
        }

        report
    }

    async fn prune(&self, session_id: &str) {
        if !self.prune_stale_sessions {
            return;
        }
        if let Err(e) = self.sessions.delete(session_id).await {
            warn!(session_id = %session_id, error = %e, "Failed to prune stale session");
        }
    }
}
