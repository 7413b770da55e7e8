//! Session worker for individual client connections.
//!
//! Each accepted client gets its own `SessionWorker` that:
//! - Negotiates a unique display name with the registry
//! - Reads frames and routes list / quit / chat
//! - Removes its session and announces the departure when it ends
//!
//! ```text
//! Admitting ──▶ Active ──▶ Terminating ──▶ Closed
//!     │                                      ▲
//!     └──────── (full, closed, shutdown) ────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Write failures to the own client are logged; the next read notices
//!   the dead connection
//! - A worker that unwinds while admitted evicts its session through the
//!   `AdmissionGuard` it holds

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::{DisplayName, Session};
use relay_protocol::{Command, Frame, FrameCodec, Notice, DEFAULT_MAX_FRAME_LEN};

use crate::dispatcher::Dispatcher;
use crate::registry::{AdmissionGuard, RegistryError, RegistryHandle, RemovalReason};
use crate::writer::{SendError, SessionWriter};

/// Per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Close sessions that send nothing for this long (None = never)
    pub idle_timeout: Option<Duration>,

    /// Longest accepted inbound frame in bytes
    pub max_frame_len: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Everything a worker shares with the rest of the server.
#[derive(Clone)]
pub struct WorkerContext {
    pub registry: RegistryHandle,
    pub dispatcher: Dispatcher,
    pub options: SessionOptions,
    pub cancel_token: CancellationToken,
}

impl WorkerContext {
    /// Creates a context whose dispatcher reads from `registry`.
    pub fn new(
        registry: RegistryHandle,
        options: SessionOptions,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            options,
            cancel_token,
        }
    }
}

/// Lifecycle of one client connection.
#[derive(Debug)]
enum WorkerState {
    /// Waiting for an acceptable display name
    Admitting,

    /// Registered and relaying messages
    Active(Session),

    /// Leaving the registry
    Terminating {
        session: Session,
        reason: RemovalReason,
    },

    /// Nothing left to do
    Closed,
}

/// Result of waiting for the next inbound frame.
#[derive(Debug)]
enum Inbound {
    Frame(Frame),
    Closed,
    ReadError(io::Error),
    IdleTimeout,
    Shutdown,
}

/// Worker driving a single client connection.
pub struct SessionWorker<R> {
    /// Inbound frames from the client
    frames: FramedRead<R, FrameCodec>,

    /// Outbound half, also handed to the registry on admission
    writer: SessionWriter,

    /// Peer address
    remote_addr: SocketAddr,

    /// Shared server state
    context: WorkerContext,

    /// Sequence number assigned by the listener
    connection_number: u64,

    /// Evicts the session if the worker is dropped while admitted
    guard: Option<AdmissionGuard>,
}

impl<R> SessionWorker<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Creates a worker for an accepted connection.
    ///
    /// # Arguments
    ///
    /// * `reader` - Read half of the client stream
    /// * `writer` - Write handle for the same client
    /// * `remote_addr` - Peer address
    /// * `context` - Registry, dispatcher, limits and shutdown token
    /// * `connection_number` - Unique number for this connection
    pub fn new(
        reader: R,
        writer: SessionWriter,
        remote_addr: SocketAddr,
        context: WorkerContext,
        connection_number: u64,
    ) -> Self {
        let codec = FrameCodec::with_max_length(context.options.max_frame_len);
        Self {
            frames: FramedRead::new(reader, codec),
            writer,
            remote_addr,
            context,
            connection_number,
            guard: None,
        }
    }

    /// Runs the worker until the connection is done.
    ///
    /// Returns the session if the client was ever admitted.
    pub async fn run(mut self) -> Option<Session> {
        debug!(
            connection = self.connection_number,
            remote_addr = %self.remote_addr,
            "New client connected"
        );

        let mut admitted = None;
        let mut state = WorkerState::Admitting;

        loop {
            state = match state {
                WorkerState::Admitting => match self.admit().await {
                    Ok(next) => next,
                    Err(e) => {
                        debug!(
                            connection = self.connection_number,
                            error = %e,
                            "Admission ended"
                        );
                        WorkerState::Closed
                    }
                },
                WorkerState::Active(session) => {
                    admitted = Some(session.clone());
                    self.serve(session).await
                }
                WorkerState::Terminating { session, reason } => {
                    self.terminate(&session, reason).await;
                    WorkerState::Closed
                }
                WorkerState::Closed => break,
            };
        }

        if let Err(e) = self.writer.close().await {
            debug!(
                connection = self.connection_number,
                error = %e,
                "Failed to close connection cleanly"
            );
        }

        debug!(connection = self.connection_number, "Client connection closed");
        admitted
    }

    /// Negotiates a display name.
    ///
    /// Only this loop retries: invalid and taken names get a reprompt.
    async fn admit(&mut self) -> Result<WorkerState, ConnectionError> {
        self.writer.send(&Notice::NamePrompt).await?;

        loop {
            let raw = match self.receive().await {
                Inbound::Frame(Frame::Line(line)) => line,
                Inbound::Frame(Frame::Oversized { max }) => {
                    self.writer
                        .send(&Notice::invalid_name(format!("longer than {max} bytes")))
                        .await?;
                    continue;
                }
                Inbound::Closed => return Err(ConnectionError::Eof),
                Inbound::ReadError(e) => return Err(ConnectionError::Io(e.to_string())),
                Inbound::IdleTimeout => {
                    self.writer.send(&self.idle_notice()).await?;
                    return Err(ConnectionError::Timeout);
                }
                Inbound::Shutdown => {
                    self.writer.send(&Notice::ShuttingDown).await?;
                    return Ok(WorkerState::Closed);
                }
            };

            let name = match DisplayName::parse(&raw) {
                Ok(name) => name,
                Err(e) => {
                    debug!(connection = self.connection_number, error = %e, "Invalid name");
                    self.writer.send(&Notice::invalid_name(e)).await?;
                    continue;
                }
            };

            // Broadcasts reach the writer as soon as it is registered; holding
            // it keeps them behind the admission reply
            let mut held = self.writer.hold().await;

            match self
                .context
                .registry
                .try_admit(name, self.remote_addr, self.writer.clone())
                .await
            {
                Ok(session) => {
                    self.guard = Some(self.context.registry.guard(session.id));
                    let welcome = Notice::Welcome {
                        name: session.name.clone(),
                    };
                    if let Err(e) = held.send(&welcome).await {
                        debug!(
                            connection = self.connection_number,
                            error = %e,
                            "Failed to send to client"
                        );
                    }
                    drop(held);

                    self.on_admitted(&session).await;
                    return Ok(WorkerState::Active(session));
                }
                Err(RegistryError::NameTaken(name)) => {
                    debug!(
                        connection = self.connection_number,
                        name = %name,
                        "Name taken, reprompting"
                    );
                    held.send(&Notice::NameTaken).await?;
                }
                Err(RegistryError::RegistryFull { max }) => {
                    info!(
                        connection = self.connection_number,
                        remote_addr = %self.remote_addr,
                        max,
                        "Chatroom full, disconnecting client"
                    );
                    held.send(&Notice::CapacityExceeded { max }).await?;
                    return Ok(WorkerState::Closed);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Announces a freshly admitted client to the others.
    async fn on_admitted(&mut self, session: &Session) {
        info!(
            connection = self.connection_number,
            session_id = %session.id,
            name = %session.name,
            remote_addr = %session.remote_addr,
            "Client joined"
        );

        self.context
            .dispatcher
            .broadcast(
                &Notice::Joined {
                    name: session.name.clone(),
                },
                session.id,
            )
            .await;
    }

    /// Relays frames until the session has to end.
    async fn serve(&mut self, session: Session) -> WorkerState {
        loop {
            let reason = match self.receive().await {
                Inbound::Frame(Frame::Line(line)) => match Command::parse(&line) {
                    Command::ListUsers => {
                        let names = self.context.registry.names().await;
                        self.reply(&Notice::UserList { names }).await;
                        continue;
                    }
                    Command::Quit => RemovalReason::Quit,
                    Command::Empty => continue,
                    Command::Chat(text) => {
                        let report = self
                            .context
                            .dispatcher
                            .broadcast(&Notice::chat(&session.name, text), session.id)
                            .await;
                        debug!(
                            session_id = %session.id,
                            delivered = report.delivered,
                            failed = report.failed,
                            "Relayed chat message"
                        );
                        continue;
                    }
                },
                Inbound::Frame(Frame::Oversized { max }) => {
                    debug!(session_id = %session.id, max, "Discarded oversized message");
                    self.reply(&Notice::MessageTooLong { max }).await;
                    continue;
                }
                Inbound::Closed => RemovalReason::Disconnected,
                Inbound::ReadError(e) => {
                    debug!(session_id = %session.id, error = %e, "Read failed");
                    RemovalReason::Disconnected
                }
                Inbound::IdleTimeout => {
                    self.reply(&self.idle_notice()).await;
                    RemovalReason::IdleTimeout
                }
                Inbound::Shutdown => {
                    self.reply(&Notice::ShuttingDown).await;
                    RemovalReason::Shutdown
                }
            };

            return WorkerState::Terminating { session, reason };
        }
    }

    /// Leaves the registry and announces the departure if it was ours.
    async fn terminate(&mut self, session: &Session, reason: RemovalReason) {
        match self.context.registry.remove(session.id, reason).await {
            Ok(true) => {
                info!(
                    connection = self.connection_number,
                    session_id = %session.id,
                    name = %session.name,
                    reason = %reason,
                    connected_secs = session.connected_secs(),
                    "Client left"
                );
                self.context
                    .dispatcher
                    .broadcast(
                        &Notice::Left {
                            name: session.name.clone(),
                        },
                        session.id,
                    )
                    .await;
            }
            Ok(false) => {
                debug!(session_id = %session.id, "Session was already removed");
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Failed to remove session");
            }
        }

        if let Some(guard) = self.guard.take() {
            guard.disarm();
        }
    }

    /// Waits for the next frame, the idle limit or shutdown.
    async fn receive(&mut self) -> Inbound {
        let idle_timeout = self.context.options.idle_timeout;
        let frames = &mut self.frames;
        let next_frame = async move {
            match idle_timeout {
                Some(limit) => timeout(limit, frames.next()).await.ok(),
                None => Some(frames.next().await),
            }
        };

        tokio::select! {
            biased;

            _ = self.context.cancel_token.cancelled() => Inbound::Shutdown,

            read = next_frame => match read {
                None => Inbound::IdleTimeout,
                Some(None) => Inbound::Closed,
                Some(Some(Ok(frame))) => Inbound::Frame(frame),
                Some(Some(Err(e))) => Inbound::ReadError(e),
            },
        }
    }

    /// Sends to the own client, logging failures.
    async fn reply(&mut self, notice: &Notice) {
        if let Err(e) = self.writer.send(notice).await {
            debug!(
                connection = self.connection_number,
                error = %e,
                "Failed to send to client"
            );
        }
    }

    fn idle_notice(&self) -> Notice {
        Notice::IdleTimeout {
            secs: self
                .context
                .options
                .idle_timeout
                .map(|limit| limit.as_secs())
                .unwrap_or_default(),
        }
    }
}

/// Errors that end a connection before admission completes.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Send failed: {0}")]
    Send(#[from] SendError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Idle timeout")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{
        AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
    };
    use tokio::task::JoinHandle;

    use crate::registry::spawn_registry;

    const RECV_TIMEOUT: Duration = Duration::from_secs(2);

    struct TestClient {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        write: WriteHalf<DuplexStream>,
    }

    impl TestClient {
        async fn send(&mut self, line: &str) {
            self.write
                .write_all(format!("{line}\n").as_bytes())
                .await
                .unwrap();
        }

        async fn recv(&mut self) -> Option<String> {
            timeout(RECV_TIMEOUT, self.lines.next_line())
                .await
                .ok()?
                .ok()?
        }
    }

    fn context(registry: RegistryHandle, options: SessionOptions) -> WorkerContext {
        WorkerContext::new(registry, options, CancellationToken::new())
    }

    fn spawn_worker(context: WorkerContext) -> (TestClient, JoinHandle<Option<Session>>) {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, client_write) = tokio::io::split(client);

        let worker = SessionWorker::new(
            server_read,
            SessionWriter::new(server_write),
            SocketAddr::from(([127, 0, 0, 1], 40000)),
            context,
            0,
        );
        let handle = tokio::spawn(worker.run());

        let client = TestClient {
            lines: BufReader::new(client_read).lines(),
            write: client_write,
        };
        (client, handle)
    }

    async fn join_as(client: &mut TestClient, name: &str) {
        assert_eq!(client.recv().await.as_deref(), Some("Please enter your username:"));
        client.send(name).await;
        assert_eq!(client.recv().await, Some(format!("Welcome {name}")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_welcome_precedes_concurrent_chat() {
        let registry = spawn_registry(4);
        let ctx = context(registry.clone(), SessionOptions::default());

        let (mut bob, _b) = spawn_worker(ctx.clone());
        join_as(&mut bob, "bob").await;

        let (mut alice, _a) = spawn_worker(ctx);
        assert_eq!(alice.recv().await.as_deref(), Some("Please enter your username:"));

        let chatter = tokio::spawn(async move {
            for i in 0..50 {
                bob.send(&format!("msg {i}")).await;
            }
            bob
        });
        alice.send("alice").await;

        assert_eq!(alice.recv().await.as_deref(), Some("Welcome alice"));
        let _bob = chatter.await.unwrap();
    }

    #[tokio::test]
    async fn test_admission_and_quit() {
        let registry = spawn_registry(4);
        let (mut client, handle) = spawn_worker(context(registry.clone(), SessionOptions::default()));

        join_as(&mut client, "alice").await;
        assert_eq!(registry.session_count().await, 1);

        client.send("\\bye").await;
        let session = handle.await.unwrap().unwrap();

        assert_eq!(session.name.as_str(), "alice");
        assert_eq!(registry.session_count().await, 0);
        assert_eq!(client.recv().await, None);
    }

    #[tokio::test]
    async fn test_reprompts_for_taken_and_invalid_names() {
        let registry = spawn_registry(4);
        let ctx = context(registry.clone(), SessionOptions::default());

        let (mut alice, _alice_handle) = spawn_worker(ctx.clone());
        join_as(&mut alice, "alice").await;

        let (mut client, _handle) = spawn_worker(ctx);
        assert_eq!(client.recv().await.as_deref(), Some("Please enter your username:"));

        client.send("alice").await;
        assert_eq!(
            client.recv().await.as_deref(),
            Some("Username already exists. Please enter a different username:")
        );

        client.send("\\list").await;
        let reprompt = client.recv().await.unwrap();
        assert!(reprompt.starts_with("Invalid username ("));
        assert!(reprompt.ends_with("Please enter a different username:"));

        client.send("   ").await;
        assert!(client.recv().await.unwrap().starts_with("Invalid username ("));

        client.send("  bob  ").await;
        assert_eq!(client.recv().await.as_deref(), Some("Welcome bob"));
        assert_eq!(alice.recv().await.as_deref(), Some("bob joined"));
    }

    #[tokio::test]
    async fn test_full_registry_disconnects() {
        let registry = spawn_registry(1);
        let ctx = context(registry.clone(), SessionOptions::default());

        let (mut alice, _alice_handle) = spawn_worker(ctx.clone());
        join_as(&mut alice, "alice").await;

        let (mut client, handle) = spawn_worker(ctx);
        assert_eq!(client.recv().await.as_deref(), Some("Please enter your username:"));
        client.send("bob").await;
        assert_eq!(
            client.recv().await.as_deref(),
            Some("Chatroom is full (max 1 users). Disconnecting.")
        );

        assert!(handle.await.unwrap().is_none());
        assert_eq!(client.recv().await, None);
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_list_includes_self_and_ignores_empty_lines() {
        let registry = spawn_registry(4);
        let ctx = context(registry.clone(), SessionOptions::default());

        let (mut alice, _a) = spawn_worker(ctx.clone());
        join_as(&mut alice, "alice").await;
        let (mut bob, _b) = spawn_worker(ctx);
        join_as(&mut bob, "bob").await;
        assert_eq!(alice.recv().await.as_deref(), Some("bob joined"));

        bob.send("").await;
        bob.send("\\list").await;
        assert_eq!(bob.recv().await.as_deref(), Some("Users in chatroom (2):"));
        assert_eq!(bob.recv().await.as_deref(), Some("alice"));
        assert_eq!(bob.recv().await.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_oversized_message_keeps_session() {
        let registry = spawn_registry(4);
        let options = SessionOptions {
            idle_timeout: None,
            max_frame_len: 16,
        };
        let ctx = context(registry.clone(), options);

        let (mut alice, _a) = spawn_worker(ctx.clone());
        join_as(&mut alice, "alice").await;
        let (mut bob, _b) = spawn_worker(ctx);
        join_as(&mut bob, "bob").await;
        assert_eq!(alice.recv().await.as_deref(), Some("bob joined"));

        bob.send(&"x".repeat(64)).await;
        assert_eq!(
            bob.recv().await.as_deref(),
            Some("Message too long (max 16 bytes), discarded")
        );

        bob.send("still here").await;
        assert_eq!(alice.recv().await.as_deref(), Some("bob: still here"));
        assert_eq!(registry.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_left() {
        let registry = spawn_registry(4);
        let ctx = context(registry.clone(), SessionOptions::default());

        let (mut alice, _a) = spawn_worker(ctx.clone());
        join_as(&mut alice, "alice").await;
        let (mut bob, bob_handle) = spawn_worker(ctx);
        join_as(&mut bob, "bob").await;
        assert_eq!(alice.recv().await.as_deref(), Some("bob joined"));

        drop(bob);
        assert_eq!(bob_handle.await.unwrap().unwrap().name.as_str(), "bob");
        assert_eq!(alice.recv().await.as_deref(), Some("bob left"));
        assert_eq!(registry.names().await, vec![DisplayName::parse("alice").unwrap()]);
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_session() {
        let registry = spawn_registry(4);
        let options = SessionOptions {
            idle_timeout: Some(Duration::from_millis(100)),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        };
        let (mut client, handle) = spawn_worker(context(registry.clone(), options));

        join_as(&mut client, "alice").await;
        assert_eq!(
            client.recv().await.as_deref(),
            Some("Disconnected after 0s of inactivity")
        );

        assert!(handle.await.unwrap().is_some());
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_notifies_and_removes() {
        let registry = spawn_registry(4);
        let ctx = context(registry.clone(), SessionOptions::default());
        let token = ctx.cancel_token.clone();

        let (mut alice, alice_handle) = spawn_worker(ctx.clone());
        join_as(&mut alice, "alice").await;
        let (mut pending, pending_handle) = spawn_worker(ctx);
        assert_eq!(pending.recv().await.as_deref(), Some("Please enter your username:"));

        token.cancel();

        assert_eq!(alice.recv().await.as_deref(), Some("Server is shutting down"));
        assert_eq!(pending.recv().await.as_deref(), Some("Server is shutting down"));
        assert!(alice_handle.await.unwrap().is_some());
        assert!(pending_handle.await.unwrap().is_none());
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_during_admission() {
        let registry = spawn_registry(4);
        let (mut client, handle) = spawn_worker(context(registry.clone(), SessionOptions::default()));

        assert_eq!(client.recv().await.as_deref(), Some("Please enter your username:"));
        drop(client);

        assert!(handle.await.unwrap().is_none());
        assert_eq!(registry.session_count().await, 0);
    }

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::from(RegistryError::ChannelClosed);
        assert!(err.to_string().contains("Registry error"));
    }
}
