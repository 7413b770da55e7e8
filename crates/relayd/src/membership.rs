//! Membership logger.
//!
//! Subscribes to registry events and logs every join and departure along
//! with the live member list.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::DisplayName;

use crate::registry::{RemovalReason, SessionEvent};

/// Spawns the membership logger task.
///
/// The task ends when the event channel closes or `cancel_token` fires.
pub fn spawn_membership_logger(
    mut events: broadcast::Receiver<SessionEvent>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Membership logger shutting down");
                    break;
                }

                result = events.recv() => {
                    match result {
                        Ok(event) => log_event(&event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Membership logger lagged, skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Event channel closed");
                            break;
                        }
                    }
                }
            }
        }
    })
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Joined { session, members } => {
            info!(
                session_id = %session.id,
                name = %session.name,
                remote_addr = %session.remote_addr,
                count = members.len(),
                members = %join_names(members),
                "Member joined"
            );
        }
        SessionEvent::Left {
            session,
            reason,
            members,
        } => {
            let message = match reason {
                RemovalReason::Disconnected | RemovalReason::Aborted => "Member disconnected",
                _ => "Member left",
            };
            info!(
                session_id = %session.id,
                name = %session.name,
                reason = %reason,
                connected_secs = session.connected_secs(),
                count = members.len(),
                members = %join_names(members),
                "{message}"
            );
        }
    }
}

fn join_names(names: &[DisplayName]) -> String {
    names
        .iter()
        .map(DisplayName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
