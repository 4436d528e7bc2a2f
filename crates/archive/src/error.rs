//! Archive Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The container is readable but has no entry with the expected name.
    #[display("archive has no entry named {_0:?}")]
    MissingEntry(#[error(not(source))] String),
    /// Data is not a ZIP container, or an entry is corrupt. Don't retry with
    /// the same input.
    #[display("malformed archive")]
    Malformed,
    /// Building a container failed.
    #[display("failed to write archive")]
    Write,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::MissingEntry("a".to_string()).to_string(), "archive has no entry named \"a\"");
        assert_eq!(ErrorKind::Malformed.to_string(), "malformed archive");
        assert!(!ErrorKind::Malformed.is_retryable());
    }
}
