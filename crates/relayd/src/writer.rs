//! Outbound half of a client connection.
//!
//! A `SessionWriter` is shared between the session's own worker and every
//! broadcast that targets it. Writes are serialized by a per-connection
//! mutex and bounded by a timeout, so one stalled client costs a broadcast
//! at most `WRITE_TIMEOUT`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tokio_util::codec::FramedWrite;

use relay_protocol::{FrameCodec, Notice};

/// Write timeout (10 seconds)
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;
type Framed = FramedWrite<BoxedWrite, FrameCodec>;

/// Errors from writing to a client.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Write timeout")]
    Timeout,
}

/// Cheap-to-clone handle for writing lines to one client.
#[derive(Clone)]
pub struct SessionWriter {
    inner: Arc<Mutex<Framed>>,
    write_timeout: Duration,
}

impl SessionWriter {
    /// Wraps any async writer with the default write timeout.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_timeout(writer, WRITE_TIMEOUT)
    }

    /// Wraps any async writer with a custom write timeout.
    pub fn with_timeout<W>(writer: W, write_timeout: Duration) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: BoxedWrite = Box::new(writer);
        Self {
            inner: Arc::new(Mutex::new(FramedWrite::new(boxed, FrameCodec::new()))),
            write_timeout,
        }
    }

    /// Writes one line of text and flushes it.
    pub async fn send_line(&self, text: &str) -> Result<(), SendError> {
        let mut framed = self.inner.lock().await;
        write_line(&mut framed, self.write_timeout, text).await
    }

    /// Renders and writes a notice.
    pub async fn send(&self, notice: &Notice) -> Result<(), SendError> {
        self.send_line(&notice.to_string()).await
    }

    /// Takes exclusive access until the returned guard is dropped.
    ///
    /// Other senders, broadcasts included, wait for the guard.
    pub async fn hold(&self) -> HeldWriter {
        HeldWriter {
            framed: Arc::clone(&self.inner).lock_owned().await,
            write_timeout: self.write_timeout,
        }
    }

    /// Flushes and shuts down the write side of the connection.
    pub async fn close(&self) -> Result<(), SendError> {
        let mut framed = self.inner.lock().await;

        match timeout(self.write_timeout, SinkExt::<&str>::close(&mut *framed)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SendError::Io(e.to_string())),
            Err(_) => Err(SendError::Timeout),
        }
    }
}

/// Exclusive write access obtained from [`SessionWriter::hold`].
pub struct HeldWriter {
    framed: OwnedMutexGuard<Framed>,
    write_timeout: Duration,
}

impl HeldWriter {
    /// Renders and writes a notice.
    pub async fn send(&mut self, notice: &Notice) -> Result<(), SendError> {
        write_line(&mut self.framed, self.write_timeout, &notice.to_string()).await
    }
}

async fn write_line(
    framed: &mut Framed,
    write_timeout: Duration,
    text: &str,
) -> Result<(), SendError> {
    match timeout(write_timeout, framed.send(text)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SendError::Io(e.to_string())),
        Err(_) => Err(SendError::Timeout),
    }
}

impl fmt::Debug for SessionWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionWriter")
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::DisplayName;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

    #[tokio::test]
    async fn test_send_appends_newline() {
        let (client, server) = tokio::io::duplex(256);
        let writer = SessionWriter::new(server);
        let mut reader = BufReader::new(client);

        let name = DisplayName::parse("alice").unwrap();
        writer.send(&Notice::chat(&name, "hi")).await.unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "alice: hi\n");
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let (mut client, server) = tokio::io::duplex(64);
        let writer = SessionWriter::new(server);

        writer.send_line("bye").await.unwrap();
        writer.close().await.unwrap();

        let mut received = String::new();
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "bye\n");
    }

    #[tokio::test]
    async fn test_send_to_dropped_peer_fails() {
        let (client, server) = tokio::io::duplex(64);
        let writer = SessionWriter::new(server);
        drop(client);

        let result = writer.send_line("anyone there?").await;
        assert!(matches!(result, Err(SendError::Io(_))));
    }

    #[tokio::test]
    async fn test_held_writer_goes_first() {
        let (client, server) = tokio::io::duplex(256);
        let writer = SessionWriter::new(server);
        let mut lines = BufReader::new(client).lines();

        let mut held = writer.hold().await;
        let other = writer.clone();
        let queued = tokio::spawn(async move { other.send_line("later").await });
        tokio::task::yield_now().await;

        held.send(&Notice::NamePrompt).await.unwrap();
        drop(held);
        queued.await.unwrap().unwrap();

        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("Please enter your username:")
        );
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("later"));
    }

    #[tokio::test]
    async fn test_stalled_peer_times_out() {
        // 4-byte pipe that nobody reads
        let (_client, server) = tokio::io::duplex(4);
        let writer = SessionWriter::with_timeout(server, Duration::from_millis(50));

        let result = writer.send_line("this does not fit").await;
        assert!(matches!(result, Err(SendError::Timeout)));
    }
}
