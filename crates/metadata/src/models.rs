use crate::error::{Error, ErrorKind};
use derive_more::Display;
use exn::ResultExt;
use time::Date;

/// Kind of document a metadata row describes.
///
/// Stored as a numeric type id; the values are fixed by the downstream
/// consumers of the `file_data` table.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FileType {
    #[display("report")]
    Report = 1,
    #[display("site plan")]
    SitePlan = 2,
}
impl FileType {
    pub fn id(self) -> u8 {
        self as u8
    }
}

/// Metadata for one uploaded establishment document.
///
/// `file_url` is the address of the directory the document was uploaded to,
/// and `file_name` the decoded name within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub establishment_id: u64,
    pub establishment_name: String,
    pub file_type: FileType,
    pub file_name: String,
    pub file_url: String,
}

#[derive(sqlx::FromRow)]
pub(crate) struct FileDataRow {
    pub(crate) supplier_key: String,
    pub(crate) establishment_id: i64,
    pub(crate) establishment_name: String,
    pub(crate) file_type_id: i64,
    pub(crate) site_visit_date: Date,
    pub(crate) file_name: String,
    pub(crate) file_url: String,
}
impl FileDataRow {
    pub(crate) fn new(record: &DocumentMetadata, supplier_key: &str, site_visit_date: Date) -> Result<Self, Error> {
        Ok(Self {
            supplier_key: supplier_key.to_string(),
            establishment_id: i64::try_from(record.establishment_id)
                .or_raise(|| ErrorKind::InvalidData("establishment id"))?,
            establishment_name: record.establishment_name.clone(),
            file_type_id: i64::from(record.file_type.id()),
            site_visit_date,
            file_name: record.file_name.clone(),
            file_url: record.file_url.clone(),
        })
    }
}
