//! Relay Protocol - Wire protocol for chat clients
//!
//! This crate provides the text protocol spoken between chat clients
//! and the relay daemon:
//! - `codec` - newline/NUL delimited framing with a frame size limit
//! - `command` - recognition of the `\list` and `\bye` commands
//! - `notice` - every line the server writes to a client

pub mod codec;
pub mod command;
pub mod notice;

pub use codec::{Frame, FrameCodec, DEFAULT_MAX_FRAME_LEN};
pub use command::{Command, LIST_COMMAND, QUIT_COMMAND};
pub use notice::Notice;
