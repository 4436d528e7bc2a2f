//! Depth-first enumeration of files on a share.

use crate::cancel::guarded;
use crate::error::{ErrorKind, Result};
use async_stream::stream;
use cdc_storage::{BackendHandle, DocumentFile};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

pub type FileStream<'a> = Pin<Box<dyn Stream<Item = Result<DocumentFile>> + Send + 'a>>;

/// Stream every file beneath `path`, depth first.
///
/// Subdirectories are visited in listing order before the files of the
/// directory itself, so the deepest files come out first. Files are listed
/// lazily, one directory at a time. A listing failure is yielded as an error
/// and ends the stream.
pub fn walk<'a>(backend: &'a BackendHandle, path: Vec<String>, ct: &'a CancellationToken) -> FileStream<'a> {
    // Recursive streams need a concrete (boxed) type to terminate.
    Box::pin(stream!({
        let directories = match guarded(ct, backend.list_directories(&path), || ErrorKind::Storage).await {
            Ok(directories) => directories,
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        for directory in directories {
            let mut child = path.clone();
            child.push(directory);
            let mut files = walk(backend, child, ct);
            while let Some(file) = files.next().await {
                let failed = file.is_err();
                yield file;
                if failed {
                    return;
                }
            }
        }
        let files = match guarded(ct, backend.list_files(&path), || ErrorKind::Storage).await {
            Ok(files) => files,
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        tracing::trace!(path = ?path, count = files.len(), "Walked directory");
        for file in files {
            yield Ok(file);
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_storage::backend::MockBackend;
    use futures::TryStreamExt;
    use std::sync::Arc;

    fn segments(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_subdirectories_before_own_files() {
        let backend: BackendHandle = Arc::new(MockBackend::with_files([
            ("CDC/1 A (CDC)/top.zip", b"".to_vec()),
            ("CDC/1 A (CDC)/b/deep/leaf.zip", b"".to_vec()),
            ("CDC/1 A (CDC)/b/mid.zip", b"".to_vec()),
            ("CDC/1 A (CDC)/a/first.zip", b"".to_vec()),
            ("CDC/2 B (CDC)/other.zip", b"".to_vec()),
        ]));
        let ct = CancellationToken::new();
        let files: Vec<_> = walk(&backend, segments(&["CDC", "1 A (CDC)"]), &ct).try_collect().await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["first.zip", "leaf.zip", "mid.zip", "top.zip"]);
    }

    #[tokio::test]
    async fn test_empty_and_missing() {
        let backend: BackendHandle = Arc::new(MockBackend::default());
        let ct = CancellationToken::new();
        let files: Vec<_> = walk(&backend, segments(&["CDC", "nothing"]), &ct).try_collect().await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_listing_error_ends_stream() {
        let backend: BackendHandle = Arc::new(MockBackend::with_files([("CDC/a.zip", b"".to_vec())]));
        let ct = CancellationToken::new();
        // ".." never passes path validation.
        let mut stream = walk(&backend, segments(&["CDC", ".."]), &ct);
        let first = stream.next().await.unwrap();
        assert!(matches!(&*first.unwrap_err(), ErrorKind::Storage));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancelled() {
        let backend: BackendHandle = Arc::new(MockBackend::with_files([("CDC/1 A/a.zip", b"".to_vec())]));
        let ct = CancellationToken::new();
        ct.cancel();
        let mut stream = walk(&backend, segments(&["CDC"]), &ct);
        assert!(matches!(&*stream.next().await.unwrap().unwrap_err(), ErrorKind::Cancelled));
        assert!(stream.next().await.is_none());
    }
}
