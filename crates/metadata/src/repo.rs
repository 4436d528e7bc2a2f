//! SQLite repository for document metadata.

use crate::error::{ErrorKind, Result};
use crate::models::{DocumentMetadata, FileDataRow};
use crate::MetadataSink;
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::SqlitePool;
use time::Date;
use time::macros::date;

/// Supplier key recorded against every row unless configured otherwise.
pub const DEFAULT_SUPPLIER_KEY: &str = "abc";
/// Site visit date recorded against every row unless configured otherwise.
pub const DEFAULT_SITE_VISIT_DATE: Date = date!(2020 - 01 - 01);

/// Repository inserting [`DocumentMetadata`] into the `file_data` table.
///
/// Each record is stamped with a supplier key and site visit date that are
/// the same for the whole run. In dry-run mode nothing is written.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
    supplier_key: String,
    site_visit_date: Date,
    dry_run: bool,
}
impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool, dry_run: bool) -> Self {
        Self {
            pool,
            supplier_key: DEFAULT_SUPPLIER_KEY.to_string(),
            site_visit_date: DEFAULT_SITE_VISIT_DATE,
            dry_run,
        }
    }

    pub fn with_supplier_key(mut self, supplier_key: impl Into<String>) -> Self {
        self.supplier_key = supplier_key.into();
        self
    }

    pub fn with_site_visit_date(mut self, site_visit_date: Date) -> Self {
        self.site_visit_date = site_visit_date;
        self
    }

    /// Insert a single metadata row.
    pub async fn insert(&self, record: &DocumentMetadata) -> Result<()> {
        let row = FileDataRow::new(record, &self.supplier_key, self.site_visit_date)?;
        if self.dry_run {
            tracing::info!(
                establishment_id = record.establishment_id,
                file_name = %record.file_name,
                "Skipping metadata insert during dry run"
            );
            return Ok(());
        }
        sqlx::query(include_str!("../queries/insert_file_data.sql"))
            .bind(row.supplier_key)
            .bind(row.establishment_id)
            .bind(row.establishment_name)
            .bind(row.file_type_id)
            .bind(row.site_visit_date)
            .bind(row.file_name)
            .bind(row.file_url)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tracing::debug!(
            establishment_id = record.establishment_id,
            file_type = %record.file_type,
            file_name = %record.file_name,
            "Recorded document metadata"
        );
        Ok(())
    }
}

#[async_trait]
impl MetadataSink for Repository {
    async fn create_document_metadata(&self, record: &DocumentMetadata) -> Result<()> {
        self.insert(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::FileType;

    fn record(file_type: FileType, file_name: &str) -> DocumentMetadata {
        DocumentMetadata {
            establishment_id: 12345,
            establishment_name: "Example School".to_string(),
            file_type,
            file_name: file_name.to_string(),
            file_url: "file:///srv/dest/12345%20Example%20School%20(CDC)/Site%20Plan".to_string(),
        }
    }

    async fn rows(db: &Database) -> Vec<FileDataRow> {
        sqlx::query_as(
            "SELECT supplier_key, establishment_id, establishment_name, file_type_id, site_visit_date, file_name, file_url
             FROM file_data ORDER BY id",
        )
        .fetch_all(db.pool())
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_defaults() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::new(db.pool().clone(), false);
        repo.create_document_metadata(&record(FileType::SitePlan, "Front Elevation.pdf")).await.unwrap();
        let rows = rows(&db).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].supplier_key, "abc");
        assert_eq!(rows[0].establishment_id, 12345);
        assert_eq!(rows[0].establishment_name, "Example School");
        assert_eq!(rows[0].file_type_id, 2);
        assert_eq!(rows[0].site_visit_date, date!(2020 - 01 - 01));
        assert_eq!(rows[0].file_name, "Front Elevation.pdf");
        assert!(rows[0].file_url.ends_with("/Site%20Plan"));
        db.close().await;
    }

    #[tokio::test]
    async fn test_insert_configured_values() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::new(db.pool().clone(), false)
            .with_supplier_key("xyz")
            .with_site_visit_date(date!(2021 - 06 - 30));
        repo.insert(&record(FileType::Report, "Example School.docx")).await.unwrap();
        let rows = rows(&db).await;
        assert_eq!(rows[0].supplier_key, "xyz");
        assert_eq!(rows[0].site_visit_date, date!(2021 - 06 - 30));
        assert_eq!(rows[0].file_type_id, 1);
        db.close().await;
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::new(db.pool().clone(), true);
        repo.insert(&record(FileType::SitePlan, "Front Elevation.pdf")).await.unwrap();
        assert!(rows(&db).await.is_empty());
        db.close().await;
    }
}
