//! Read-only storage backend.
//!
//! This module provides a storage backend implementation that wraps other
//! implementations and prevents uploads from executing, but indicating
//! success on return. Used for dry runs against the destination share.

use async_trait::async_trait;
use url::Url;

use crate::{BackendHandle, DocumentFile, StorageBackend, error::Result};

/// Read-only storage backend.
///
/// Wraps another backend and silently drops all uploads, logging an
/// [`info event`](tracing::Event). The address returned for a dropped upload
/// is the one the file would have had, so callers carry on as normal.
#[derive(Clone)]
pub struct ReadOnlyBackend {
    inner: BackendHandle,
}
impl ReadOnlyBackend {
    pub fn new(inner: BackendHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl StorageBackend for ReadOnlyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list_directories(&self, path: &[String]) -> Result<Vec<String>> {
        self.inner.list_directories(path).await
    }

    async fn list_files(&self, path: &[String]) -> Result<Vec<DocumentFile>> {
        self.inner.list_files(path).await
    }

    async fn download(&self, absolute_path: &str) -> Result<Vec<u8>> {
        self.inner.download(absolute_path).await
    }

    fn locate(&self, path: &[String], filename: &str) -> Result<Url> {
        self.inner.locate(path, filename)
    }

    async fn upload(&self, path: &[String], filename: &str, mime_type: &str, data: &[u8]) -> Result<Url> {
        let url = self.inner.locate(path, filename)?;
        tracing::info!(share = %self.inner.name(), %url, mime_type, bytes = data.len(), "Skipping upload during dry run");
        Ok(url)
    }
}
