//! Document metadata recording.
//!
//! Every site plan and condition report uploaded to the destination share is
//! recorded as one row in a `file_data` table. The unpacking pipeline only
//! knows about the [`MetadataSink`] trait; [`Repository`] is the SQLite
//! implementation and [`MemoryMetadata`] (feature `mock`) collects records
//! for tests.

mod db;
pub mod error;
#[cfg(feature = "mock")]
mod memory;
mod models;
mod repo;

pub use crate::db::Database;
#[cfg(feature = "mock")]
pub use crate::memory::MemoryMetadata;
pub use crate::models::{DocumentMetadata, FileType};
pub use crate::repo::{DEFAULT_SITE_VISIT_DATE, DEFAULT_SUPPLIER_KEY, Repository};
use async_trait::async_trait;
use std::sync::Arc;

/// Destination for document metadata records.
#[async_trait]
pub trait MetadataSink: Send + Sync {
    /// Record one uploaded document.
    async fn create_document_metadata(&self, record: &DocumentMetadata) -> error::Result<()>;
}

pub type MetadataHandle = Arc<dyn MetadataSink + Send + Sync>;
