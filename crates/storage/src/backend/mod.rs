//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface over a file share: list directories, list files, download a
//! file, upload a file. The unpacker uses one backend as the source share and
//! another as the destination share.

mod local;
#[cfg(feature = "mock")]
mod mock;
mod ro;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
pub use self::ro::ReadOnlyBackend;
use crate::error::{ErrorKind, Result};
use crate::file::DocumentFile;
use async_trait::async_trait;
#[cfg(any(test, feature = "mock"))]
use percent_encoding::percent_decode_str;
use url::Url;

/// Unified interface for file shares.
///
/// All operations are asynchronous. Directory paths are segment lists,
/// validated with [`validate_path`](crate::validate_path) by every
/// implementation; an empty list is the share root.
///
/// # Examples
///
/// ```
/// use cdc_storage::{backend::StorageBackend, error::Result};
///
/// async fn total_bytes(backend: &dyn StorageBackend, dir: &[String]) -> Result<usize> {
///     let mut total = 0;
///     for file in backend.list_files(dir).await? {
///         total += backend.download(&file.absolute_path).await?.len();
///     }
///     Ok(total)
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// List the names of the immediate subdirectories of `path`, sorted.
    ///
    /// A directory that doesn't exist yields an empty list, not an error.
    async fn list_directories(&self, path: &[String]) -> Result<Vec<String>>;

    /// List the files directly inside `path`, sorted by name.
    ///
    /// A directory that doesn't exist yields an empty list, not an error.
    async fn list_files(&self, path: &[String]) -> Result<Vec<DocumentFile>>;

    /// Download the complete contents of a file previously returned by
    /// [`list_files()`](Self::list_files).
    ///
    /// Returns [`InvalidAddress`](ErrorKind::InvalidAddress) if the address
    /// doesn't belong to this backend.
    async fn download(&self, absolute_path: &str) -> Result<Vec<u8>>;

    /// The address a file named `filename` inside `path` has (or would have)
    /// on this backend. Performs no I/O.
    fn locate(&self, path: &[String], filename: &str) -> Result<Url>;

    /// Upload `data` as `filename` inside `path`, creating directories as
    /// needed and overwriting any existing file. Returns the address of the
    /// uploaded file.
    ///
    /// `mime_type` is recorded where the backend supports content types.
    async fn upload(&self, path: &[String], filename: &str, mime_type: &str, data: &[u8]) -> Result<Url>;
}

/// Parse an absolute file address, requiring the given scheme.
pub(crate) fn parse_address(absolute_path: &str, scheme: &str) -> Result<Url> {
    let url = Url::parse(absolute_path).map_err(|_| ErrorKind::InvalidAddress(absolute_path.to_string()))?;
    if url.scheme() != scheme {
        exn::bail!(ErrorKind::InvalidAddress(absolute_path.to_string()));
    }
    Ok(url)
}

/// Percent-decoded path segments of an address.
#[cfg(any(test, feature = "mock"))]
pub(crate) fn decoded_segments(url: &Url) -> Result<Vec<String>> {
    let segments = url.path_segments().ok_or_else(|| ErrorKind::InvalidAddress(url.to_string()))?;
    segments
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            percent_decode_str(segment)
                .decode_utf8()
                .map(|decoded| decoded.into_owned())
                .map_err(|_| exn::Exn::from(ErrorKind::InvalidAddress(url.to_string())))
        })
        .collect()
}
