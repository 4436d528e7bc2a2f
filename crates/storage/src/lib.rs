//! File share access for the unpacker.
//!
//! A share is a tree of directories addressed by path segments (never by
//! slash-joined strings) containing files addressed by absolute URLs. The
//! [`StorageBackend`] trait is the only thing the unpacking pipeline knows
//! about; concrete backends live in [`backend`].

pub mod backend;
pub mod error;
mod file;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::file::DocumentFile;
pub use crate::path::{validate as validate_path, validate_file_name};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
