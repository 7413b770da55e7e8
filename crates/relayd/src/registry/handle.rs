//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to membership events.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use std::net::SocketAddr;

use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

use relay_core::{DisplayName, Session, SessionId};

use super::commands::{RegistryCommand, RegistryError, RemovalReason, SessionEntry, SessionEvent};
use crate::writer::SessionWriter;

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
///
/// # Usage
///
/// ```ignore
/// let session = handle.try_admit(name, remote_addr, writer).await?;
///
/// for entry in handle.snapshot().await {
///     // deliver outside the registry
/// }
///
/// handle.remove(session.id, RemovalReason::Quit).await?;
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<SessionEvent>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    ///
    /// # Arguments
    ///
    /// * `sender` - The command channel sender for communicating with the actor
    /// * `event_sender` - The broadcast sender for subscribing to events
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Admits a client under `name`.
    ///
    /// Capacity and uniqueness are checked and the session inserted in one
    /// step, so two concurrent admissions can never both get the same name.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RegistryFull` if the registry is at maximum capacity
    /// - `RegistryError::NameTaken` if an active session uses the name
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn try_admit(
        &self,
        name: DisplayName,
        remote_addr: SocketAddr,
        writer: SessionWriter,
    ) -> Result<Session, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::TryAdmit {
                name,
                remote_addr,
                writer,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Removes a session from the registry.
    ///
    /// Returns `Ok(false)` if the session was not registered, which makes
    /// repeated removal harmless.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn remove(
        &self,
        session_id: SessionId,
        reason: RemovalReason,
    ) -> Result<bool, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Remove {
                session_id,
                reason,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Queues removal without waiting for it.
    ///
    /// Usable from synchronous contexts such as `Drop`. When the command
    /// queue is full the send is retried on a spawned task; outside a
    /// runtime, or once the actor is gone, the request is logged and dropped.
    pub fn evict(&self, session_id: SessionId) {
        let command = match self.sender.try_send(RegistryCommand::Evict { session_id }) {
            Ok(()) => return,
            Err(TrySendError::Full(command)) => command,
            Err(e @ TrySendError::Closed(_)) => {
                warn!(session_id = %session_id, error = %e, "Failed to queue session eviction");
                return;
            }
        };

        match Handle::try_current() {
            Ok(runtime) => {
                let sender = self.sender.clone();
                runtime.spawn(async move {
                    if let Err(e) = sender.send(command).await {
                        warn!(session_id = %session_id, error = %e, "Failed to queue session eviction");
                    }
                });
            }
            Err(_) => {
                warn!(session_id = %session_id, "Registry queue full outside a runtime, eviction dropped");
            }
        }
    }

    /// Returns a point-in-time copy of all entries in admission order.
    ///
    /// Returns an empty vector if the actor has shut down.
    pub async fn snapshot(&self) -> Vec<SessionEntry> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Snapshot { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Returns the display names of all active sessions in admission order.
    pub async fn names(&self) -> Vec<DisplayName> {
        self.snapshot()
            .await
            .into_iter()
            .map(|entry| entry.session.name)
            .collect()
    }

    /// Returns the number of active sessions.
    pub async fn session_count(&self) -> usize {
        self.snapshot().await.len()
    }

    /// Creates a guard that evicts `session_id` if dropped while armed.
    pub fn guard(&self, session_id: SessionId) -> AdmissionGuard {
        AdmissionGuard {
            registry: self.clone(),
            session_id,
            armed: true,
        }
    }

    /// Subscribe to membership events.
    ///
    /// This is a synchronous operation - it doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_sender.subscribe()
    }
}

// ============================================================================
// Admission Guard
// ============================================================================

/// Evicts an admitted session when dropped, unless disarmed first.
///
/// A worker holds one from admission until its orderly removal, so a
/// worker that unwinds never leaves its session registered.
pub struct AdmissionGuard {
    registry: RegistryHandle,
    session_id: SessionId,
    armed: bool,
}

impl AdmissionGuard {
    /// The guarded session.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Consumes the guard without evicting.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        if self.armed {
            self.registry.evict(self.session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_handle() -> (RegistryHandle, mpsc::Receiver<RegistryCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = broadcast::channel(16);
        let handle = RegistryHandle::new(cmd_tx, event_tx);
        (handle, cmd_rx)
    }

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    #[tokio::test]
    async fn test_try_admit_sends_command() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::TryAdmit {
                name,
                remote_addr,
                respond_to,
                ..
            }) = rx.recv().await
            {
                assert_eq!(name.as_str(), "alice");
                let session = Session::new(SessionId::new(1), name, remote_addr);
                let _ = respond_to.send(Ok(session));
                return true;
            }
            false
        });

        let result = handle
            .try_admit(
                DisplayName::parse("alice").unwrap(),
                addr(),
                SessionWriter::new(tokio::io::sink()),
            )
            .await;
        assert_eq!(result.unwrap().id, SessionId::new(1));
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_try_admit_channel_closed_error() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let result = handle
            .try_admit(
                DisplayName::parse("alice").unwrap(),
                addr(),
                SessionWriter::new(tokio::io::sink()),
            )
            .await;

        assert_eq!(result, Err(RegistryError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_remove_sends_reason() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::Remove {
                session_id,
                reason,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(session_id, SessionId::new(3));
                assert_eq!(reason, RemovalReason::Quit);
                let _ = respond_to.send(true);
                return true;
            }
            false
        });

        let removed = handle.remove(SessionId::new(3), RemovalReason::Quit).await;
        assert_eq!(removed, Ok(true));
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_returns_empty_on_channel_close() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert!(handle.snapshot().await.is_empty());
        assert!(handle.names().await.is_empty());
    }

    #[tokio::test]
    async fn test_evict_ignores_closed_channel() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        // Should not panic or error
        handle.evict(SessionId::new(1));
    }

    #[tokio::test]
    async fn test_guard_evicts_on_drop() {
        let (handle, mut rx) = create_test_handle();

        drop(handle.guard(SessionId::new(9)));

        match rx.try_recv() {
            Ok(RegistryCommand::Evict { session_id }) => {
                assert_eq!(session_id, SessionId::new(9));
            }
            other => panic!("Expected Evict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disarmed_guard_does_nothing() {
        let (handle, mut rx) = create_test_handle();

        let guard = handle.guard(SessionId::new(9));
        assert_eq!(guard.session_id(), SessionId::new(9));
        guard.disarm();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_guard_evicts_when_queue_full() {
        let (cmd_tx, mut rx) = mpsc::channel(1);
        let (event_tx, _event_rx) = broadcast::channel(16);
        let handle = RegistryHandle::new(cmd_tx, event_tx);

        // Occupy the only slot
        handle.evict(SessionId::new(1));
        drop(handle.guard(SessionId::new(2)));

        let mut evicted = Vec::new();
        for _ in 0..2 {
            let cmd = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
                .await
                .expect("eviction queued");
            match cmd {
                Some(RegistryCommand::Evict { session_id }) => evicted.push(session_id),
                other => panic!("Expected Evict, got {other:?}"),
            }
        }
        assert_eq!(evicted, vec![SessionId::new(1), SessionId::new(2)]);
    }
}
