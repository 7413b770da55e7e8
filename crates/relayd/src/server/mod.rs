//! TCP listener for the chat relay.
//!
//! The server:
//! - Listens on a TCP socket for client connections
//! - Spawns a SessionWorker for each client
//! - Runs the membership logger
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │  SessionWorker  │────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └───────┬─────────┘     └─────────────────┘
//!         │
//!         │ broadcast (registry snapshot)
//!         ▼
//! ┌─────────────────┐
//! │  Other clients  │
//! └─────────────────┘
//! ```
//!
//! There is no connection limit at the transport level. Registry capacity
//! is the admission gate, so a client beyond it is told the room is full.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the loop continues
//! - A panicking worker is logged; its admission guard cleans up the registry

mod connection;

pub use connection::{ConnectionError, SessionOptions, SessionWorker, WorkerContext};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use relay_core::Session;

use crate::config::{ConfigError, RelayConfig};
use crate::membership::spawn_membership_logger;
use crate::registry::RegistryHandle;
use crate::writer::SessionWriter;

/// How long shutdown waits for workers to say goodbye (5 seconds)
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// TCP server for the chat relay.
pub struct RelayServer {
    /// Bound listener
    listener: TcpListener,

    /// Shared state handed to every worker
    context: WorkerContext,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for log correlation
    connection_counter: AtomicU64,
}

impl RelayServer {
    /// Binds the listener described by `config`.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated relay configuration
    /// * `registry` - Handle to the session registry
    /// * `cancel_token` - Token for graceful shutdown
    pub async fn bind(
        config: &RelayConfig,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let addr = config.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;

        let context = WorkerContext::new(registry, config.session_options(), cancel_token.clone());

        Ok(Self {
            listener,
            context,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::LocalAddr(e.to_string()))
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered, then
    /// waits for workers to finish. Does not return until shutdown.
    pub async fn run(self) -> Result<(), ServerError> {
        let local_addr = self.local_addr()?;
        info!(addr = %local_addr, "Chat relay listening");

        let _membership = spawn_membership_logger(
            self.context.registry.subscribe(),
            self.cancel_token.clone(),
        );

        let mut workers = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(&mut workers, stream, remote_addr, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }

                Some(result) = workers.join_next(), if !workers.is_empty() => {
                    log_worker_exit(result);
                }
            }
        }

        drop(self.listener);
        drain_workers(workers).await;

        info!("Server stopped");
        Ok(())
    }

    /// Spawns a worker for an accepted connection.
    fn handle_connection(
        &self,
        workers: &mut JoinSet<Option<Session>>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        connection_number: u64,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(
                connection = connection_number,
                error = %e,
                "Failed to disable Nagle's algorithm"
            );
        }

        debug!(
            connection = connection_number,
            remote_addr = %remote_addr,
            "Accepted connection"
        );

        let (reader, writer) = stream.into_split();
        let worker = SessionWorker::new(
            reader,
            SessionWriter::new(writer),
            remote_addr,
            self.context.clone(),
            connection_number,
        );

        workers.spawn(worker.run());
    }
}

/// Waits for workers to finish after shutdown, aborting stragglers.
async fn drain_workers(mut workers: JoinSet<Option<Session>>) {
    if workers.is_empty() {
        return;
    }

    info!(workers = workers.len(), "Waiting for sessions to close");

    let drained = timeout(SHUTDOWN_GRACE, async {
        while let Some(result) = workers.join_next().await {
            log_worker_exit(result);
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = workers.len(),
            "Sessions did not close in time, aborting"
        );
        workers.shutdown().await;
    }
}

fn log_worker_exit(result: Result<Option<Session>, tokio::task::JoinError>) {
    match result {
        Ok(Some(session)) => {
            debug!(session_id = %session.id, name = %session.name, "Worker finished");
        }
        Ok(None) => {}
        Err(e) if e.is_panic() => {
            error!(error = %e, "Worker panicked");
        }
        Err(e) => {
            debug!(error = %e, "Worker cancelled");
        }
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Failed to read local address: {0}")]
    LocalAddr(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
