//! Frame codec for the chat wire format.
//!
//! Inbound frames are terminated by `\n` or `\0`. A trailing `\r` is
//! stripped and invalid UTF-8 is replaced lossily, so any byte sequence a
//! client sends decodes to text. A frame that grows past the configured
//! limit without a terminator is reported once as [`Frame::Oversized`] and
//! its bytes are dropped up to the next terminator.
//!
//! Outbound text is written as-is followed by `\n`.
//!
//! Oversized input is an item rather than a decode error: `FramedRead`
//! ends the stream after the first error, and a long line must not end
//! the session.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Default maximum inbound frame length in bytes, terminator excluded.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line of text, terminator and trailing `\r` removed
    Line(String),

    /// A frame exceeded the length limit and was discarded
    Oversized {
        /// The limit that was exceeded
        max: usize,
    },
}

/// Codec splitting a byte stream on `\n` / `\0`.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximum frame length, terminator excluded
    max_length: usize,

    /// Index in the buffer up to which no terminator has been found
    next_index: usize,

    /// Dropping bytes until the next terminator
    discarding: bool,
}

impl FrameCodec {
    /// Creates a codec with the default frame limit.
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_FRAME_LEN)
    }

    /// Creates a codec with a custom frame limit.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn is_terminator(byte: u8) -> bool {
    byte == b'\n' || byte == b'\0'
}

fn to_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        loop {
            // Never scan further than one byte past the limit
            let read_to = buf.len().min(self.max_length.saturating_add(1));
            let terminator = buf
                .get(self.next_index..read_to)
                .and_then(|window| window.iter().position(|b| is_terminator(*b)))
                .map(|offset| offset + self.next_index);

            match (self.discarding, terminator) {
                (true, Some(end)) => {
                    buf.advance(end + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(end)) => {
                    self.next_index = 0;
                    let frame = buf.split_to(end + 1);
                    let line = frame.get(..end).map(to_text).unwrap_or_default();
                    return Ok(Some(Frame::Line(line)));
                }
                (false, None) if buf.len() > self.max_length => {
                    self.discarding = true;
                    return Ok(Some(Frame::Oversized {
                        max: self.max_length,
                    }));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        // Unterminated tail at EOF
        if buf.is_empty() || self.discarding {
            buf.clear();
            return Ok(None);
        }

        self.next_index = 0;
        let rest = buf.split();
        Ok(Some(Frame::Line(to_text(&rest))))
    }
}

impl<T: AsRef<str>> Encoder<T> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, text: T, buf: &mut BytesMut) -> Result<(), io::Error> {
        let text = text.as_ref();
        buf.reserve(text.len() + 1);
        buf.put_slice(text.as_bytes());
        buf.put_u8(b'\n');
        Ok(())
    }
}
