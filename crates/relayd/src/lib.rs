//! Chat relay daemon - session registry and broadcast server
//!
//! This crate provides the core infrastructure for the relay:
//! - `registry` - Session registry actor owning chat membership
//! - `dispatcher` - Fan-out of notices to every other session
//! - `server` - TCP listener and per-client session workers
//! - `membership` - Logging of joins, departures and the member list
//! - `config` - Layered relay configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       relayd daemon                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   RelayServer   │     │     RegistryActor           │   │
//! │  │  (TcpListener)  │     │  (membership owner)         │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                     ▲       │                   │
//! │           │ connections         │       │ events            │
//! │           ▼                     │       ▼                   │
//! │  ┌─────────────────┐  admit/    │  ┌──────────────────────┐ │
//! │  │  SessionWorker  │──remove────┘  │  membership logger   │ │
//! │  │  (per client)   │               └──────────────────────┘ │
//! │  └────────┬────────┘                                        │
//! │           │ chat                                            │
//! │           ▼                                                 │
//! │  ┌─────────────────┐                                        │
//! │  │   Dispatcher    │── snapshot ──▶ other clients           │
//! │  └─────────────────┘                                        │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod dispatcher;
pub mod membership;
pub mod registry;
pub mod server;
pub mod writer;
