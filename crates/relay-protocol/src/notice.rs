//! Lines written by the relay to clients.

use std::fmt;

use relay_core::DisplayName;

/// Every message the relay sends to a client.
///
/// `Display` renders the exact wire text, without the trailing newline
/// the codec appends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// First prompt after connecting
    NamePrompt,

    /// The requested name belongs to an active session
    NameTaken,

    /// The requested name fails validation
    InvalidName {
        /// Why the name was rejected
        reason: String,
    },

    /// The relay is at capacity; the connection is closed after this
    CapacityExceeded {
        /// Configured maximum number of clients
        max: usize,
    },

    /// Sent to a client once admitted
    Welcome { name: DisplayName },

    /// Another client was admitted
    Joined { name: DisplayName },

    /// Another client left
    Left { name: DisplayName },

    /// Chat text relayed from another client
    Chat { from: DisplayName, text: String },

    /// Reply to the list command
    UserList { names: Vec<DisplayName> },

    /// An inbound frame was too long and was dropped
    MessageTooLong { max: usize },

    /// The session was closed for inactivity
    IdleTimeout { secs: u64 },

    /// The relay is stopping
    ShuttingDown,
}

impl Notice {
    /// Creates a chat notice.
    pub fn chat(from: &DisplayName, text: &str) -> Self {
        Self::Chat {
            from: from.clone(),
            text: text.to_string(),
        }
    }

    /// Creates an invalid-name notice from any displayable reason.
    pub fn invalid_name<E: fmt::Display>(reason: E) -> Self {
        Self::InvalidName {
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NamePrompt => f.write_str("Please enter your username:"),
            Self::NameTaken => {
                f.write_str("Username already exists. Please enter a different username:")
            }
            Self::InvalidName { reason } => write!(
                f,
                "Invalid username ({reason}). Please enter a different username:"
            ),
            Self::CapacityExceeded { max } => {
                write!(f, "Chatroom is full (max {max} users). Disconnecting.")
            }
            Self::Welcome { name } => write!(f, "Welcome {name}"),
            Self::Joined { name } => write!(f, "{name} joined"),
            Self::Left { name } => write!(f, "{name} left"),
            Self::Chat { from, text } => write!(f, "{from}: {text}"),
            Self::UserList { names } => {
                write!(f, "Users in chatroom ({}):", names.len())?;
                for name in names {
                    write!(f, "\n{name}")?;
                }
                Ok(())
            }
            Self::MessageTooLong { max } => {
                write!(f, "Message too long (max {max} bytes), discarded")
            }
            Self::IdleTimeout { secs } => {
                write!(f, "Disconnected after {secs}s of inactivity")
            }
            Self::ShuttingDown => f.write_str("Server is shutting down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> DisplayName {
        DisplayName::parse(s).unwrap()
    }

    #[test]
    fn test_membership_notices() {
        assert_eq!(Notice::Joined { name: name("bob") }.to_string(), "bob joined");
        assert_eq!(Notice::Left { name: name("bob") }.to_string(), "bob left");
        assert_eq!(
            Notice::Welcome { name: name("alice") }.to_string(),
            "Welcome alice"
        );
    }

    #[test]
    fn test_chat_notice() {
        let notice = Notice::chat(&name("alice"), "hello");
        assert_eq!(notice.to_string(), "alice: hello");
    }

    #[test]
    fn test_user_list_has_header_and_one_line_per_name() {
        let notice = Notice::UserList {
            names: vec![name("alice"), name("bob"), name("carol")],
        };
        assert_eq!(
            notice.to_string(),
            "Users in chatroom (3):\nalice\nbob\ncarol"
        );
    }

    #[test]
    fn test_empty_user_list() {
        let notice = Notice::UserList { names: Vec::new() };
        assert_eq!(notice.to_string(), "Users in chatroom (0):");
    }

    #[test]
    fn test_rejection_notices() {
        assert!(Notice::NameTaken.to_string().starts_with("Username already exists"));
        assert_eq!(
            Notice::CapacityExceeded { max: 10 }.to_string(),
            "Chatroom is full (max 10 users). Disconnecting."
        );

        let err = DisplayName::parse("").unwrap_err();
        assert_eq!(
            Notice::invalid_name(err).to_string(),
            "Invalid username (name must not be empty). Please enter a different username:"
        );
    }
}
