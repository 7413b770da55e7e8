//! Recognition of client commands.

/// Payload that requests the user listing.
pub const LIST_COMMAND: &str = "\\list";

/// Payload that ends the session.
pub const QUIT_COMMAND: &str = "\\bye";

/// What an inbound line from an admitted client asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Send the current user listing to the requester only
    ListUsers,

    /// Leave the chat
    Quit,

    /// Relay the text to every other client
    Chat(&'a str),

    /// Zero-length line, nothing to do
    Empty,
}

impl<'a> Command<'a> {
    /// Classifies a payload.
    ///
    /// Commands match only the entire payload: `\list now` and ` \bye`
    /// are chat text.
    pub fn parse(payload: &'a str) -> Self {
        match payload {
            LIST_COMMAND => Self::ListUsers,
            QUIT_COMMAND => Self::Quit,
            "" => Self::Empty,
            text => Self::Chat(text),
        }
    }
}
