//! Registry actor - owns all session state and processes commands.
//!
//! The RegistryActor is the single owner of the membership. It receives
//! commands via an mpsc channel and publishes events via broadcast.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Response send failures are ignored (the requester went away)
//! - Event publish failures are ignored (no subscribers)

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use relay_core::{DisplayName, Session, SessionId};

use super::commands::{RegistryCommand, RegistryError, RemovalReason, SessionEntry, SessionEvent};
use crate::writer::SessionWriter;

/// Default maximum number of concurrently admitted sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 10;

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all session state.
///
/// # Ownership
///
/// The actor owns:
/// - `sessions`: entries keyed by `SessionId`. Ids increase with every
///   admission, so iteration order is admission order.
/// - `names`: index for display name → id lookups, kept in lockstep
///   with `sessions`.
///
/// # Thread Safety
///
/// The actor runs in a single task and processes commands sequentially.
/// No admission, removal or snapshot ever observes another one half-done.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Active sessions in admission order
    sessions: BTreeMap<SessionId, SessionEntry>,

    /// Index of names in use
    names: HashMap<DisplayName, SessionId>,

    /// Id handed to the next admitted session
    next_id: SessionId,

    /// Capacity limit
    max_sessions: usize,

    /// Event publisher for membership changes
    event_publisher: broadcast::Sender<SessionEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `event_publisher` - Broadcast channel for publishing events
    /// * `max_sessions` - Maximum number of concurrently admitted sessions
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<SessionEvent>,
        max_sessions: usize,
    ) -> Self {
        Self {
            receiver,
            sessions: BTreeMap::new(),
            names: HashMap::new(),
            next_id: SessionId::new(1),
            max_sessions,
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!(max_sessions = self.max_sessions, "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(sessions = self.sessions.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::TryAdmit {
                name,
                remote_addr,
                writer,
                respond_to,
            } => {
                let result = self.handle_try_admit(name, remote_addr, writer);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Remove {
                session_id,
                reason,
                respond_to,
            } => {
                let removed = self.handle_remove(session_id, reason);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::Evict { session_id } => {
                self.handle_remove(session_id, RemovalReason::Aborted);
            }
            RegistryCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.sessions.values().cloned().collect());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Handles admission: capacity first, then name uniqueness.
    fn handle_try_admit(
        &mut self,
        name: DisplayName,
        remote_addr: SocketAddr,
        writer: SessionWriter,
    ) -> Result<Session, RegistryError> {
        if self.sessions.len() >= self.max_sessions {
            warn!(
                name = %name,
                remote_addr = %remote_addr,
                current = self.sessions.len(),
                max = self.max_sessions,
                "Registry is full, rejecting admission"
            );
            return Err(RegistryError::RegistryFull {
                max: self.max_sessions,
            });
        }

        if let Some(existing) = self.names.get(&name) {
            debug!(
                name = %name,
                existing = %existing,
                "Name already in use, rejecting admission"
            );
            return Err(RegistryError::NameTaken(name));
        }

        let id = self.next_id;
        self.next_id = id.next();

        let session = Session::new(id, name, remote_addr);
        self.names.insert(session.name.clone(), id);
        self.sessions.insert(
            id,
            SessionEntry {
                session: session.clone(),
                writer,
            },
        );

        info!(
            session_id = %id,
            name = %session.name,
            remote_addr = %remote_addr,
            total_sessions = self.sessions.len(),
            "Session admitted"
        );

        // Publish event (ignore if no subscribers)
        let _ = self.event_publisher.send(SessionEvent::Joined {
            session: session.clone(),
            members: self.member_names(),
        });

        Ok(session)
    }

    /// Handles session removal. Removing an absent session is a no-op.
    fn handle_remove(&mut self, session_id: SessionId, reason: RemovalReason) -> bool {
        let Some(entry) = self.sessions.remove(&session_id) else {
            debug!(
                session_id = %session_id,
                reason = %reason,
                "Session already removed"
            );
            return false;
        };

        self.names.remove(&entry.session.name);

        info!(
            session_id = %session_id,
            name = %entry.session.name,
            reason = %reason,
            total_sessions = self.sessions.len(),
            "Session removed"
        );

        let _ = self.event_publisher.send(SessionEvent::Left {
            session: entry.session,
            reason,
            members: self.member_names(),
        });

        true
    }

    fn member_names(&self) -> Vec<DisplayName> {
        self.sessions
            .values()
            .map(|entry| entry.session.name.clone())
            .collect()
    }

    /// Returns the current session count (for testing).
    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
