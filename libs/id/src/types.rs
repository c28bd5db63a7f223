//! Handle and token types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::HandleError;

/// Maximum accepted handle length in bytes.
pub const MAX_HANDLE_LEN: usize = 256;

/// Opaque identifier assigned by the remote system on creation.
///
/// The reconciler never inspects the contents; it only compares handles
/// for equality and passes them back to the remote API.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceHandle(String);

impl ResourceHandle {
    /// Parses a handle, rejecting empty, oversized or whitespace-bearing input.
    pub fn parse(s: impl Into<String>) -> Result<Self, HandleError> {
        let s = s.into();
        if s.is_empty() {
            return Err(HandleError::Empty);
        }
        if s.len() > MAX_HANDLE_LEN {
            return Err(HandleError::TooLong {
                len: s.len(),
                max: MAX_HANDLE_LEN,
            });
        }
        if s.chars().any(char::is_whitespace) {
            return Err(HandleError::Whitespace(s));
        }
        Ok(Self(s))
    }

    /// Returns the handle as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceHandle {
    type Err = HandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceHandle {
    type Error = HandleError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<ResourceHandle> for String {
    fn from(handle: ResourceHandle) -> Self {
        handle.0
    }
}

impl AsRef<str> for ResourceHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Idempotency token sent with every create request, `ct_<ulid>`.
///
/// Generated once per create and reused on each retry of that create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientToken(Ulid);

impl ClientToken {
    pub const PREFIX: &'static str = "ct";

    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn parse(s: &str) -> Result<Self, HandleError> {
        if s.is_empty() {
            return Err(HandleError::Empty);
        }
        let (prefix, ulid) = s.split_once('_').ok_or(HandleError::MissingSeparator)?;
        if prefix != Self::PREFIX {
            return Err(HandleError::InvalidPrefix {
                expected: Self::PREFIX,
                actual: prefix.to_string(),
            });
        }
        Ulid::from_string(ulid)
            .map(Self)
            .map_err(|e| HandleError::InvalidUlid(e.to_string()))
    }
}

impl Default for ClientToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", Self::PREFIX, self.0)
    }
}

impl FromStr for ClientToken {
    type Err = HandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ClientToken {
    type Error = HandleError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ClientToken> for String {
    fn from(token: ClientToken) -> Self {
        token.to_string()
    }
}
