//! Local filesystem storage backend.
//!
//! A share is a directory on the local filesystem. Files are addressed with
//! `file://` URLs and accessed via `tokio::fs` for async I/O.

use crate::backend::parse_address;
use crate::error::ErrorKind;
use crate::{DocumentFile, StorageBackend, error::Result, validate_file_name, validate_path};
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use tokio::fs;
use url::Url;

const FILE_SCHEME: &str = "file";

enum EntryKind {
    Directory,
    File,
}

/// Local filesystem storage backend.
///
/// All paths are relative to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use cdc_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source = LocalBackend::new("source", "/srv/shares/accruent")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    /// Root directory of the share
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend, creating the root directory if
    /// it doesn't exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists and is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root.display().to_string()));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root.display().to_string()));
            }
        } else {
            // Use non-async here; it'll only happen once on startup and it's
            // not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    /// Get the absolute path for a segment path.
    fn absolute_path(&self, path: &[String]) -> Result<PathBuf> {
        Ok(self.root.join(validate_path(path)?))
    }

    /// Convert a `file://` address back into an absolute path inside the
    /// root, refusing anything that resolves outside of it.
    fn path_from_address(&self, absolute_path: &str) -> Result<PathBuf> {
        let url = parse_address(absolute_path, FILE_SCHEME)?;
        let absolute = url.to_file_path().map_err(|_| ErrorKind::InvalidAddress(absolute_path.to_string()))?;
        let relative = absolute
            .strip_prefix(&self.root)
            .or_raise(|| ErrorKind::InvalidAddress(format!("{absolute_path} is not within {}", self.root.display())))?;
        let segments: Vec<String> = relative.iter().map(|s| s.to_string_lossy().into_owned()).collect();
        // Round-trip through validation so `..` can't sneak back out.
        self.absolute_path(&segments)
    }

    fn address(absolute: &Path) -> Result<Url> {
        Ok(Url::from_file_path(absolute).map_err(|_| ErrorKind::InvalidPath(absolute.display().to_string()))?)
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Read a directory and return the sorted names of entries of one kind.
    /// Broken symlinks and other oddities are silently dropped.
    async fn list_entries(&self, path: &[String], kind: EntryKind) -> Result<Vec<String>> {
        let directory = self.absolute_path(path)?;
        let mut entries = match fs::read_dir(&directory).await {
            Ok(entries) => entries,
            // To stay consistent with remote shares, asking for the contents
            // of a directory that doesn't exist results in an empty list.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => exn::bail!(Self::map_io_error(err, &directory)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Self::map_io_error(e, &directory))? {
            let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &entry.path()))?;
            let wanted = match kind {
                EntryKind::Directory => metadata.is_dir(),
                EntryKind::File => metadata.is_file(),
            };
            if !wanted {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => tracing::warn!(share = %self.name, name = ?raw, "Skipping entry with non-UTF-8 name"),
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_directories(&self, path: &[String]) -> Result<Vec<String>> {
        let names = self.list_entries(path, EntryKind::Directory).await?;
        tracing::debug!(share = %self.name, path = ?path, count = names.len(), "Listed directories");
        Ok(names)
    }

    async fn list_files(&self, path: &[String]) -> Result<Vec<DocumentFile>> {
        let directory = self.absolute_path(path)?;
        let names = self.list_entries(path, EntryKind::File).await?;
        tracing::debug!(share = %self.name, path = ?path, count = names.len(), "Listed files");
        names
            .into_iter()
            .map(|name| Ok(DocumentFile::new(Self::address(&directory.join(&name))?.to_string(), name)))
            .collect()
    }

    async fn download(&self, absolute_path: &str) -> Result<Vec<u8>> {
        let path = self.path_from_address(absolute_path)?;
        let data = fs::read(&path).await.map_err(|e| Self::map_io_error(e, &path))?;
        tracing::debug!(share = %self.name, path = %path.display(), bytes = data.len(), "Downloaded file");
        Ok(data)
    }

    fn locate(&self, path: &[String], filename: &str) -> Result<Url> {
        let directory = self.absolute_path(path)?;
        Self::address(&directory.join(validate_file_name(filename)?))
    }

    async fn upload(&self, path: &[String], filename: &str, mime_type: &str, data: &[u8]) -> Result<Url> {
        validate_file_name(filename)?;
        let mut directory = self.root.clone();
        for segment in path {
            directory.push(validate_file_name(segment)?);
            if fs::try_exists(&directory).await.map_err(ErrorKind::Io)? {
                continue;
            }
            match fs::create_dir(&directory).await {
                Ok(()) => tracing::info!(share = %self.name, directory = %segment, "Directory did not exist; created"),
                // Another establishment task got there first.
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {},
                Err(e) => exn::bail!(Self::map_io_error(e, &directory)),
            }
        }
        let target = directory.join(filename);
        fs::write(&target, data).await.map_err(|e| Self::map_io_error(e, &target))?;
        // Plain filesystems have nowhere to keep a content type.
        tracing::info!(share = %self.name, path = %target.display(), bytes = data.len(), mime_type, "Uploaded file");
        Self::address(&target)
    }
}
