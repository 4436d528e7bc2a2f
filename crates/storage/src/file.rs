/// A file discovered by listing a directory on a share.
///
/// `absolute_path` is an absolute URL that the backend which produced it will
/// accept in [`download()`](crate::StorageBackend::download). `name` is the
/// bare file name, and is the only thing classification looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFile {
    pub absolute_path: String,
    pub name: String,
}
impl DocumentFile {
    pub fn new(absolute_path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            absolute_path: absolute_path.into(),
            name: name.into(),
        }
    }
}
