//! Single-entry ZIP containers.
//!
//! Every document on the source share is stored as a ZIP container holding
//! exactly one interesting entry, always named [`ENTRY_NAME`]. Containers are
//! small enough (tens of megabytes at most) to be handled entirely in memory.

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::{Cursor, Read, Write};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Name of the entry holding the payload in every source container.
pub const ENTRY_NAME: &str = "a";

/// Extract the entry literally named `entry_name` from a ZIP container held
/// in memory, returning its decompressed bytes.
///
/// # Errors
///
/// - [`ErrorKind::MissingEntry`] if the container has no such entry.
/// - [`ErrorKind::Malformed`] if `zip_bytes` is not a readable container, or
///   the entry cannot be decompressed.
///
/// # Examples
///
/// ```
/// use cdc_archive::{ENTRY_NAME, extract_single_entry, pack_single_entry};
///
/// let container = pack_single_entry(ENTRY_NAME, b"%PDF-1.7").unwrap();
/// assert_eq!(extract_single_entry(&container, ENTRY_NAME).unwrap(), b"%PDF-1.7");
/// ```
pub fn extract_single_entry(zip_bytes: &[u8], entry_name: &str) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(zip_bytes)).or_raise(|| ErrorKind::Malformed)?;
    let mut entry = match archive.by_name(entry_name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => exn::bail!(ErrorKind::MissingEntry(entry_name.to_string())),
        Err(err) => return Err(err).or_raise(|| ErrorKind::Malformed),
    };
    // The declared size is a hint only; a lying header must not cause a huge
    // up-front allocation.
    let capacity = usize::try_from(entry.size()).unwrap_or(0).min(64 * 1024 * 1024);
    let mut data = Vec::with_capacity(capacity);
    entry.read_to_end(&mut data).or_raise(|| ErrorKind::Malformed)?;
    tracing::trace!(entry = entry_name, bytes = data.len(), "Extracted archive entry");
    Ok(data)
}

/// Build a ZIP container with a single deflated entry.
///
/// The inverse of [`extract_single_entry`]; used to produce fixtures.
pub fn pack_single_entry(entry_name: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file(entry_name, SimpleFileOptions::default()).or_raise(|| ErrorKind::Write)?;
    writer.write_all(data).or_raise(|| ErrorKind::Write)?;
    let cursor = writer.finish().or_raise(|| ErrorKind::Write)?;
    Ok(cursor.into_inner())
}
