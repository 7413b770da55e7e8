//! Relay Core - Shared types for the chat relay
//!
//! This crate provides the domain types shared between the wire
//! protocol (relay-protocol) and the daemon (relayd).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod name;
pub mod session;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use name::{DisplayName, MAX_NAME_CHARS, RESERVED_PREFIX};
pub use session::{Session, SessionId};
