//! File classification by name.
//!
//! Only the file name is ever inspected; contents are never sniffed.

use derive_more::Display;

const SITE_PLAN_PDF_SUFFIX: &str = "_application_pdf.zip";
const SITE_PLAN_OCTET_SUFFIX: &str = "_application_octet-stream.zip";
const DWG_MARKER: &str = "dwg";
const TEXT_MARKER: &str = "_text_";
const JPEG_MARKER: &str = "jpeg";
const PNG_MARKER: &str = "png";
const PDF_MARKER: &str = "_application_pdf";
pub const ARCHIVED_REPORT_NAME: &str = "report.zip";
pub const REPORT_NAME: &str = "report.docx";

/// What a source file is, and therefore where it goes.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileCategory {
    #[display("site plan")]
    SitePlan,
    #[display("evidence")]
    Evidence,
    #[display("archived report")]
    ArchivedReport,
    #[display("report")]
    Report,
    #[display("unrecognized")]
    Unrecognized,
}

/// Classify a file by name. The first matching rule wins, so a name that
/// mentions both `dwg` and `jpeg` is a site plan.
pub fn classify(name: &str) -> FileCategory {
    if name.ends_with(SITE_PLAN_PDF_SUFFIX) || name.ends_with(SITE_PLAN_OCTET_SUFFIX) || name.contains(DWG_MARKER) {
        FileCategory::SitePlan
    } else if name.contains(TEXT_MARKER) || name.contains(JPEG_MARKER) || name.contains(PNG_MARKER) {
        FileCategory::Evidence
    } else if name == ARCHIVED_REPORT_NAME {
        FileCategory::ArchivedReport
    } else if name == REPORT_NAME {
        FileCategory::Report
    } else {
        FileCategory::Unrecognized
    }
}

/// Extension (with leading dot) the unpacked payload of `name` should be
/// given, or an empty string if there is no telling.
pub fn extension_for(name: &str) -> &'static str {
    if name.contains(JPEG_MARKER) {
        ".jpeg"
    } else if name.contains(PNG_MARKER) {
        ".png"
    } else if name.contains(TEXT_MARKER) {
        ".txt"
    } else if name.contains(PDF_MARKER) {
        ".pdf"
    } else if name.contains(DWG_MARKER) {
        ".dwg"
    } else if name == ARCHIVED_REPORT_NAME || name == REPORT_NAME {
        ".docx"
    } else {
        ""
    }
}
