//! Session registry using Actor pattern.
//!
//! The registry is the single owner of chat membership: which sessions are
//! admitted, under which names, and how to write to them. It receives
//! commands via a tokio mpsc channel and processes them one at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │  SessionWorker  │────▶│  RegistryActor  │────▶│ Broadcast Channel│
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                       │
//!         │   RegistryCommand     │   SessionEvent        │
//!         │   (mpsc channel)      │   (broadcast)         │
//!         ▼                       ▼                       ▼
//!    TryAdmit/Remove/       BTreeMap<SessionId,     Membership logger
//!    Snapshot               SessionEntry>
//! ```
//!
//! Snapshots are copies: the dispatcher writes to clients after the actor
//! has moved on, so a slow client never holds up admissions or removals.

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, DEFAULT_MAX_SESSIONS};
pub use commands::{RegistryCommand, RegistryError, RemovalReason, SessionEntry, SessionEvent};
pub use handle::{AdmissionGuard, RegistryHandle};

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Spawn the registry actor and return a handle for interaction.
///
/// # Example
///
/// ```no_run
/// use relayd::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry(10);
///     let names = handle.names().await;
///     assert!(names.is_empty());
/// }
/// ```
pub fn spawn_registry(max_sessions: usize) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone(), max_sessions);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
