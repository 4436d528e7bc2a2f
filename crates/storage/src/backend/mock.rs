//! In-memory storage backend for testing.

use crate::backend::{decoded_segments, parse_address};
use crate::error::{ErrorKind, Result};
use crate::{DocumentFile, StorageBackend, validate_file_name, validate_path};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

const MOCK_SCHEME: &str = "mock";

#[derive(Clone)]
struct MockFile {
    data: Vec<u8>,
    mime_type: Option<String>,
}

/// In-memory storage backend for testing.
///
/// Files are stored in a `BTreeMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Directories exist
/// implicitly whenever a file exists beneath them. Addresses look like
/// `mock://{name}/CDC/12345%20School/file.zip`.
///
/// Besides storage, the backend counts uploads and records the peak number of
/// calls in flight at once, optionally holding every call for a fixed latency
/// so that overlapping callers actually overlap.
///
/// # Examples
///
/// ```
/// use cdc_storage::backend::{MockBackend, StorageBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("CDC/12345 Example School (CDC)/abc_image_jpeg.zip", b"PK..".to_vec()),
/// ]);
/// let root = vec!["CDC".to_string()];
/// assert_eq!(backend.list_directories(&root).await?, vec!["12345 Example School (CDC)"]);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<BTreeMap<PathBuf, MockFile>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    uploads: AtomicUsize,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files, keyed by
    /// slash-separated relative paths.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl AsRef<str>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = BTreeMap::new();
        for (path, data) in files {
            let path = path.as_ref();
            let segments: Vec<&str> = path.split('/').collect();
            let Ok(validated) = validate_path(&segments) else {
                // The panic here is DELIBERATE. MockBackend is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockBackend::with_files: invalid path {path}");
            };
            map.insert(validated, MockFile { data: data.into(), mime_type: None });
        }
        Self {
            name: MOCK_SCHEME.to_string(),
            storage: RwLock::new(map),
            latency: None,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
        }
    }

    /// Change the name of the mock backend (also the host of its addresses).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Hold every trait call for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Contents of a stored file.
    pub async fn read(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.storage.read().await.get(path.as_ref()).map(|file| file.data.clone())
    }

    /// Content type a file was uploaded with.
    pub async fn mime_type(&self, path: impl AsRef<Path>) -> Option<String> {
        self.storage.read().await.get(path.as_ref()).and_then(|file| file.mime_type.clone())
    }

    /// Every stored path, sorted.
    pub async fn paths(&self) -> Vec<PathBuf> {
        self.storage.read().await.keys().cloned().collect()
    }

    /// Number of successful uploads so far.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Highest number of trait calls that were in flight at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        InFlight(&self.in_flight)
    }

    fn base_url(&self) -> Result<Url> {
        Ok(Url::parse(&format!("{MOCK_SCHEME}://{}/", self.name)).map_err(|_| ErrorKind::InvalidAddress(self.name.clone()))?)
    }

    fn address(&self, path: &Path) -> Result<Url> {
        let mut url = self.base_url()?;
        url.path_segments_mut()
            .map_err(|_| ErrorKind::InvalidAddress(self.name.clone()))?
            .pop_if_empty()
            .extend(path.iter().map(|s| s.to_string_lossy()));
        Ok(url)
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, Vec<u8>); 0] = [];
        Self::with_files(files)
    }
}

/// Decrements the in-flight counter when the call completes (or is dropped
/// by a cancelled caller).
struct InFlight<'a>(&'a AtomicUsize);
impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_directories(&self, path: &[String]) -> Result<Vec<String>> {
        let _guard = self.enter().await;
        let prefix = validate_path(path)?;
        let depth = prefix.components().count();
        let guard = self.storage.read().await;
        let names: BTreeSet<String> = guard
            .keys()
            .filter(|key| key.starts_with(&prefix) && key.components().count() > depth + 1)
            .filter_map(|key| key.iter().nth(depth).map(|s| s.to_string_lossy().into_owned()))
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn list_files(&self, path: &[String]) -> Result<Vec<DocumentFile>> {
        let _guard = self.enter().await;
        let prefix = validate_path(path)?;
        let guard = self.storage.read().await;
        guard
            .keys()
            .filter(|key| key.parent() == Some(prefix.as_path()))
            .map(|key| {
                let name = key.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
                Ok(DocumentFile::new(self.address(key)?.to_string(), name))
            })
            .collect()
    }

    async fn download(&self, absolute_path: &str) -> Result<Vec<u8>> {
        let _guard = self.enter().await;
        let url = parse_address(absolute_path, MOCK_SCHEME)?;
        if url.host_str() != Some(self.name.as_str()) {
            exn::bail!(ErrorKind::InvalidAddress(absolute_path.to_string()));
        }
        let path = validate_path(&decoded_segments(&url)?)?;
        let guard = self.storage.read().await;
        let file = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(file.data.clone())
    }

    fn locate(&self, path: &[String], filename: &str) -> Result<Url> {
        let directory = validate_path(path)?;
        self.address(&directory.join(validate_file_name(filename)?))
    }

    async fn upload(&self, path: &[String], filename: &str, mime_type: &str, data: &[u8]) -> Result<Url> {
        let _guard = self.enter().await;
        let target = validate_path(path)?.join(validate_file_name(filename)?);
        let url = self.address(&target)?;
        let file = MockFile {
            data: data.to_vec(),
            mime_type: Some(mime_type.to_string()),
        };
        self.storage.write().await.insert(target, file);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn segments(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn fixture() -> MockBackend {
        MockBackend::with_files([
            ("CDC/1 A (CDC)/x.zip", b"x".to_vec()),
            ("CDC/1 A (CDC)/sub/deep/y.zip", b"y".to_vec()),
            ("CDC/2 B (CDC)/z.zip", b"z".to_vec()),
            ("CDC/top.zip", b"t".to_vec()),
        ])
    }

    #[tokio::test]
    async fn test_list_directories() {
        let backend = fixture();
        assert_eq!(backend.list_directories(&segments(&["CDC"])).await.unwrap(), vec!["1 A (CDC)", "2 B (CDC)"]);
        assert_eq!(backend.list_directories(&segments(&["CDC", "1 A (CDC)"])).await.unwrap(), vec!["sub"]);
        assert_eq!(backend.list_directories(&[]).await.unwrap(), vec!["CDC"]);
        assert!(backend.list_directories(&segments(&["nope"])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_files_only_direct_children() {
        let backend = fixture();
        let files = backend.list_files(&segments(&["CDC", "1 A (CDC)"])).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "x.zip");
        assert_eq!(files[0].absolute_path, "mock://mock/CDC/1%20A%20(CDC)/x.zip");
    }

    #[tokio::test]
    async fn test_download_listed_file() {
        let backend = fixture();
        let files = backend.list_files(&segments(&["CDC", "1 A (CDC)", "sub", "deep"])).await.unwrap();
        assert_eq!(backend.download(&files[0].absolute_path).await.unwrap(), b"y");
    }

    #[tokio::test]
    async fn test_download_wrong_host() {
        let backend = fixture();
        let err = backend.download("mock://elsewhere/CDC/top.zip").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidAddress(_)));
        let err = backend.download("mock://mock/CDC/missing.zip").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_upload_records_mime_type() {
        let backend = MockBackend::default().with_name("dest");
        let dir = segments(&["00001 A (CDC)", "Site Plan"]);
        let url = backend.upload(&dir, "Front Elevation.pdf", "application/pdf", b"%PDF").await.unwrap();
        assert_eq!(url.as_str(), "mock://dest/00001%20A%20(CDC)/Site%20Plan/Front%20Elevation.pdf");
        assert_eq!(url, backend.locate(&dir, "Front Elevation.pdf").unwrap());
        let stored = PathBuf::from("00001 A (CDC)/Site Plan/Front Elevation.pdf");
        assert_eq!(backend.read(&stored).await.unwrap(), b"%PDF");
        assert_eq!(backend.mime_type(&stored).await.as_deref(), Some("application/pdf"));
        assert_eq!(backend.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_peak_concurrency() {
        let backend = Arc::new(MockBackend::default().with_latency(Duration::from_millis(20)));
        let root = segments(&["CDC"]);
        let (a, b) = tokio::join!(backend.list_files(&root), backend.list_files(&root));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(backend.peak_concurrency(), 2);
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MockBackend::with_files([("../escape", b"bad".to_vec())]);
    }
}
