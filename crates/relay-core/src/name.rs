//! Display names and the admission validation policy.

use std::fmt;

use crate::error::{DomainError, DomainResult};

/// Maximum length of a display name, in characters.
pub const MAX_NAME_CHARS: usize = 32;

/// Leading character reserved for commands (`\list`, `\bye`).
pub const RESERVED_PREFIX: char = '\\';

/// A validated display name.
///
/// Equality is case-sensitive and exact: `Alice` and `alice` are
/// different names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayName(String);

impl DisplayName {
    /// Validates a candidate name received during admission.
    ///
    /// Surrounding whitespace is trimmed before the checks run.
    ///
    /// # Errors
    ///
    /// - `DomainError::EmptyName` if nothing is left after trimming
    /// - `DomainError::NameTooLong` if longer than [`MAX_NAME_CHARS`]
    /// - `DomainError::ControlCharacter` for any control character
    /// - `DomainError::ReservedPrefix` if the name starts with `\`
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(DomainError::EmptyName);
        }

        let len = trimmed.chars().count();
        if len > MAX_NAME_CHARS {
            return Err(DomainError::NameTooLong {
                len,
                max: MAX_NAME_CHARS,
            });
        }

        if let Some(found) = trimmed.chars().find(|c| c.is_control()) {
            return Err(DomainError::ControlCharacter { found });
        }

        if trimmed.starts_with(RESERVED_PREFIX) {
            return Err(DomainError::ReservedPrefix {
                prefix: RESERVED_PREFIX,
            });
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DisplayName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
