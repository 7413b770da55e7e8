//! Broadcast fan-out to every session except the sender.
//!
//! Delivery is best-effort per recipient. A failed write is logged and
//! counted, never propagated: the recipient's own worker notices a dead
//! connection when its next read fails, and removes the session itself.

use futures::future::join_all;
use tracing::debug;

use relay_core::SessionId;
use relay_protocol::Notice;

use crate::registry::{RegistryHandle, SessionEntry};
use crate::writer::SendError;

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients the notice was written to
    pub delivered: usize,

    /// Recipients whose write failed or timed out
    pub failed: usize,
}

/// Sends notices to registered sessions.
#[derive(Clone)]
pub struct Dispatcher {
    registry: RegistryHandle,
}

impl Dispatcher {
    /// Creates a dispatcher reading membership from `registry`.
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }

    /// Delivers `notice` to every registered session except `exclude`.
    ///
    /// Membership is read from a registry snapshot, and all writes happen
    /// after the snapshot is taken. Writes to different recipients run
    /// concurrently, so one stalled client does not delay the rest.
    pub async fn broadcast(&self, notice: &Notice, exclude: SessionId) -> BroadcastReport {
        let recipients: Vec<SessionEntry> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|entry| entry.session.id != exclude)
            .collect();

        if recipients.is_empty() {
            return BroadcastReport::default();
        }

        let line = notice.to_string();
        let results = join_all(
            recipients
                .iter()
                .map(|entry| entry.writer.send_line(&line)),
        )
        .await;

        let mut report = BroadcastReport::default();
        for (entry, result) in recipients.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(
                        session_id = %entry.session.id,
                        name = %entry.session.name,
                        error = %e,
                        "Failed to deliver broadcast, skipping recipient"
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Delivers `notice` to a single registered session.
    pub async fn send_to(&self, entry: &SessionEntry, notice: &Notice) -> Result<(), SendError> {
        entry.writer.send(notice).await.inspect_err(|e| {
            debug!(
                session_id = %entry.session.id,
                name = %entry.session.name,
                error = %e,
                "Failed to deliver notice"
            );
        })
    }
}
