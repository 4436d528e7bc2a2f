//! Unpack Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// An unpack error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for unpack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of an unpack failure.
///
/// ### Recoverable
/// - [`ErrorKind::NotAZipFile`] - the file is skipped, never escapes a file.
///
/// ### Dependency Errors
/// - [`ErrorKind::Storage`]
/// - [`ErrorKind::Archive`]
/// - [`ErrorKind::Metadata`]
/// - [`ErrorKind::Evidence`]
///
/// ### Operational Errors
/// - [`ErrorKind::Cancelled`]
/// - [`ErrorKind::MissingIdentifier`]
/// - [`ErrorKind::Panicked`]
/// - [`ErrorKind::InvalidPass`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A desired name does not contain the extension marker it should be
    /// numbered in front of.
    #[display("{_0:?} has no {_1:?} extension to number")]
    NotAZipFile(#[error(not(source))] String, #[error(not(source))] String),
    /// A source or destination share operation failed.
    Storage,
    /// A downloaded container could not be unpacked.
    Archive,
    /// Recording document metadata failed.
    Metadata,
    /// The evidence table could not be read.
    #[display("invalid evidence table: {_0}")]
    Evidence(#[error(not(source))] String),
    /// The run was cancelled before it finished.
    Cancelled,
    /// An establishment without an identifier reached processing.
    #[display("establishment {_0:?} has no identifier")]
    MissingIdentifier(#[error(not(source))] String),
    /// An establishment task panicked.
    #[display("establishment task panicked: {_0}")]
    Panicked(#[error(not(source))] String),
    /// A pass carries names from a pass that has not run before it.
    #[display("pass {_0} carries from {_1}, which has not run")]
    InvalidPass(#[error(not(source))] String, #[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Metadata)
    }
}
