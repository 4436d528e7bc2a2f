//! In-memory metadata sink for testing.

use crate::error::Result;
use crate::{DocumentMetadata, MetadataSink};
use async_trait::async_trait;
use std::sync::Mutex;

/// Collects every record in insertion order.
#[derive(Debug, Default)]
pub struct MemoryMetadata {
    records: Mutex<Vec<DocumentMetadata>>,
}
impl MemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<DocumentMetadata> {
        self.records.lock().map(|records| records.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MetadataSink for MemoryMetadata {
    async fn create_document_metadata(&self, record: &DocumentMetadata) -> Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }
}
