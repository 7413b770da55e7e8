//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Name is empty after trimming surrounding whitespace
    #[error("name must not be empty")]
    EmptyName,

    /// Name exceeds the character limit
    #[error("name is {len} characters long (max {max})")]
    NameTooLong { len: usize, max: usize },

    /// Name contains a control character
    #[error("name contains control character {found:?}")]
    ControlCharacter { found: char },

    /// Name starts with the command prefix
    #[error("name must not start with '{prefix}'")]
    ReservedPrefix { prefix: char },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
