//! Core types for the chatsec protocol
//!
//! Newtypes for the identifiers that travel on the wire, validated on
//! construction so the rest of the code can rely on their shape.

use core::fmt;
use core::ops::Deref;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::errors::AuthError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Maximum length of a display name in bytes
pub const MAX_NAME_LEN: usize = 32;

/// Leading characters reserved by the line protocol
const RESERVED_PREFIXES: &[char] = &['/', '@', '[', '#'];

// ----------------------------------------------------------------------------
// Display Name
// ----------------------------------------------------------------------------

/// Display name of a participant, unique among active sessions
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DisplayName(String);

impl DisplayName {
    /// Validate and wrap a candidate display name
    pub fn new<T: Into<String>>(name: T) -> Result<Self, AuthError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= MAX_NAME_LEN
            && !name.chars().any(char::is_whitespace)
            && !name.starts_with(RESERVED_PREFIXES);

        if valid {
            Ok(Self(name))
        } else {
            Err(AuthError::InvalidName { name })
        }
    }

    /// Provisional name held by a connection that has not named itself yet.
    ///
    /// Starts with `#`, which [`DisplayName::new`] refuses, so it can never
    /// collide with a chosen name.
    pub fn provisional(id: SessionId) -> Self {
        Self(format!("#{}", id.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DisplayName {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Deref for DisplayName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq<str> for DisplayName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for DisplayName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

// ----------------------------------------------------------------------------
// Session Identifier
// ----------------------------------------------------------------------------

/// Server-assigned identifier of an accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_validation() {
        assert!(DisplayName::new("alice").is_ok());
        assert!(DisplayName::new("").is_err());
        assert!(DisplayName::new("two words").is_err());
        assert!(DisplayName::new("/quit").is_err());
        assert!(DisplayName::new("@bob").is_err());
        assert!(DisplayName::new("[SERVER]").is_err());
        assert!(DisplayName::new("a".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_provisional_names_never_collide() {
        let provisional = DisplayName::provisional(SessionId::new(7));
        assert_eq!(provisional, "#7");
        assert!(DisplayName::new(provisional.as_str()).is_err());
    }
}
