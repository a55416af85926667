//! ID parse errors.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("empty ID")]
    Empty,

    /// The ID names another kind of object, e.g. a replica where a sandbox
    /// was expected.
    #[error("ID has prefix '{actual}', expected '{expected}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    #[error("ID has no '_' between prefix and ULID")]
    MissingSeparator,

    #[error("malformed ULID in ID: {0}")]
    InvalidUlid(String),
}

impl IdError {
    pub fn is_prefix_error(&self) -> bool {
        matches!(self, IdError::InvalidPrefix { .. })
    }
}
