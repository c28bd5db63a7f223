//! Error types for handle and token parsing.

use thiserror::Error;

/// Errors that can occur when parsing handles or tokens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandleError {
    /// The input string is empty.
    #[error("handle cannot be empty")]
    Empty,

    /// The handle contains whitespace.
    #[error("handle contains whitespace: '{0}'")]
    Whitespace(String),

    /// The handle exceeds the maximum length.
    #[error("handle too long: {len} bytes (max {max})")]
    TooLong { len: usize, max: usize },

    /// The token has an invalid prefix.
    #[error("invalid token prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    /// The token is missing the underscore separator.
    #[error("token missing underscore separator")]
    MissingSeparator,

    /// The ULID portion of the token is invalid.
    #[error("invalid ULID: {0}")]
    InvalidUlid(String),
}

impl HandleError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, HandleError::Empty)
    }
}
