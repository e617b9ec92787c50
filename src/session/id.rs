//! Session identity type.

use std::fmt;
use std::str::FromStr;

use crate::error::RelayError;

/// Maximum identity length; identities name files on disk.
pub const MAX_IDENTITY_LEN: usize = 64;

/// Stable, operator-chosen name of one linked account (e.g. `david`).
///
/// The identity keys the credential file, the status ledger and the
/// supervisor registry slot. Only ASCII letters, digits, `-` and `_` are
/// accepted so that the name is always a safe file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionIdentity(String);

impl SessionIdentity {
    /// Validate and wrap a proposed name.
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if Self::is_valid(&name) {
            Ok(Self(name))
        } else {
            Err(RelayError::InvalidIdentity(name))
        }
    }

    /// Check a candidate name without allocating.
    pub fn is_valid(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= MAX_IDENTITY_LEN
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionIdentity {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.trim())
    }
}

impl AsRef<str> for SessionIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
