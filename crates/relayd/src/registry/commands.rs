//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `SessionEvent`: Events published by the registry for subscribers
//! - `SessionEntry`: A session together with its connection handle

use std::fmt;
use std::net::SocketAddr;

use relay_core::{DisplayName, Session, SessionId};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::writer::SessionWriter;

// ============================================================================
// Registry Entries
// ============================================================================

/// A registered session and the handle used to write to its client.
///
/// Cloning is cheap: the writer is reference counted, so snapshots hand
/// out clones rather than borrowing registry state.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Identity and metadata
    pub session: Session,

    /// Outbound half of the client's connection
    pub writer: SessionWriter,
}

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each request/response command carries a oneshot channel for the
/// result. The actor handles commands one at a time, so every command
/// observes and leaves a consistent membership.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Admit a client under a display name.
    ///
    /// # Errors
    /// - `RegistryError::RegistryFull` if at maximum capacity
    /// - `RegistryError::NameTaken` if an active session uses the name
    TryAdmit {
        /// Requested display name
        name: DisplayName,
        /// Peer address of the connection
        remote_addr: SocketAddr,
        /// Outbound handle stored with the session
        writer: SessionWriter,
        /// Channel to send the admitted session
        respond_to: oneshot::Sender<Result<Session, RegistryError>>,
    },

    /// Remove a session. Responds `false` if it was already gone.
    Remove {
        /// ID of the session to remove
        session_id: SessionId,
        /// Why the session is leaving
        reason: RemovalReason,
        /// Channel to send whether anything was removed
        respond_to: oneshot::Sender<bool>,
    },

    /// Fire-and-forget removal used when a worker unwinds.
    Evict {
        /// ID of the session to remove
        session_id: SessionId,
    },

    /// Point-in-time copy of the membership in admission order.
    Snapshot {
        /// Channel to send the entries
        respond_to: oneshot::Sender<Vec<SessionEntry>>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry has reached its maximum session capacity.
    #[error("registry is full (max: {max} sessions)")]
    RegistryFull {
        /// Maximum number of sessions allowed
        max: usize,
    },

    /// An active session already uses this display name.
    #[error("name already taken: {0}")]
    NameTaken(DisplayName),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Session Events
// ============================================================================

/// Reason for session removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Client sent the quit command
    Quit,
    /// Connection closed or failed
    Disconnected,
    /// No input within the idle timeout
    IdleTimeout,
    /// Relay is shutting down
    Shutdown,
    /// Worker ended without a clean shutdown
    Aborted,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Quit => "quit",
            Self::Disconnected => "disconnected",
            Self::IdleTimeout => "idle_timeout",
            Self::Shutdown => "shutdown",
            Self::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// Events published by the registry after each membership change.
///
/// `members` is the membership right after the change, in admission
/// order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session was admitted.
    Joined {
        /// The admitted session
        session: Session,
        /// Names of all active sessions
        members: Vec<DisplayName>,
    },

    /// A session was removed.
    Left {
        /// The removed session
        session: Session,
        /// Reason for removal
        reason: RemovalReason,
        /// Names of all remaining sessions
        members: Vec<DisplayName>,
    },
}
