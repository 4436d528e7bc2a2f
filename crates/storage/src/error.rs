//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// File or directory does not exist
    #[display("not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied (permissions or credentials)
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Path segment is empty, relative, or contains a separator
    #[display("invalid path: {_0}")]
    InvalidPath(#[error(not(source))] String),
    /// Absolute file address could not be parsed, or belongs to another share
    #[display("invalid file address: {_0}")]
    InvalidAddress(#[error(not(source))] String),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::BackendError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::NotFound(PathBuf::from("CDC/x")).to_string(), "not found: CDC/x");
        assert_eq!(ErrorKind::InvalidPath("..".to_string()).to_string(), "invalid path: ..");
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorKind::BackendError("throttled".to_string()).is_retryable());
        assert!(!ErrorKind::InvalidAddress("nope".to_string()).is_retryable());
    }
}
