//! Session identity and metadata.

use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};

use crate::name::DisplayName;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Registry-assigned identity of an admitted session.
///
/// Ids are handed out in increasing order and never reused within a
/// registry's lifetime, so ordering by id is ordering by admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a SessionId from its raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the id that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s-{}", self.0)
    }
}

// ============================================================================
// Session
// ============================================================================

/// An admitted client, as seen by everything outside the registry.
///
/// The registry hands a copy to the worker that owns the connection;
/// the copy is immutable for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Registry-assigned identity
    pub id: SessionId,

    /// Unique display name
    pub name: DisplayName,

    /// Peer address of the underlying connection
    pub remote_addr: SocketAddr,

    /// When admission completed
    pub joined_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session admitted now.
    pub fn new(id: SessionId, name: DisplayName, remote_addr: SocketAddr) -> Self {
        Self {
            id,
            name,
            remote_addr,
            joined_at: Utc::now(),
        }
    }

    /// Seconds since admission, saturating at zero.
    pub fn connected_secs(&self) -> u64 {
        let elapsed = Utc::now().signed_duration_since(self.joined_at);
        u64::try_from(elapsed.num_seconds()).unwrap_or(0)
    }
}
