//! Unpacking a single establishment.

use crate::Context;
use crate::cancel::guarded;
use crate::classify::{FileCategory, classify, extension_for};
use crate::error::{ErrorKind, Result};
use crate::establishment::Establishment;
use crate::namer::{UsedNames, claim, strip_illegal};
use crate::walk::walk;
use cdc_archive::{ENTRY_NAME, extract_single_entry};
use cdc_metadata::{DocumentMetadata, FileType};
use cdc_storage::DocumentFile;
use derive_more::Display;
use exn::ResultExt;
use futures::StreamExt;
use percent_encoding::percent_decode_str;
use std::ops::Deref;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use url::Url;

/// Site plan payloads smaller than this are placeholders, not drawings.
pub const SITE_PLAN_MIN_BYTES: usize = 10_000;
pub const SITE_PLAN_FOLDER: &str = "Site Plan";
pub const EVIDENCE_FOLDER: &str = "Evidence";
pub const REPORT_FOLDER: &str = "Condition Report";
const PDF_MIME: &str = "application/pdf";
const ZIP_MIME: &str = "application/zip";
const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const DOCX_EXTENSION: &str = ".docx";

/// Why a file was left behind.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Site plan payload too small to be a real drawing.
    #[display("payload below site plan threshold")]
    BelowThreshold,
    #[display("empty payload")]
    EmptyPayload,
    /// No display name for the file's identifier in the evidence table.
    #[display("identifier not in evidence table")]
    LookupMiss,
    /// Desired name collided and had no extension to number.
    #[display("name cannot be numbered")]
    NotAZipFile,
    /// Append-only pass found a report for the establishment already.
    #[display("report already exists")]
    DuplicateName,
    #[display("unrecognized file")]
    Unrecognized,
}

/// Result of processing one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Uploaded { category: FileCategory, name: String, url: Url },
    Skipped(SkipReason),
}

/// Everything an establishment's files need to know about where they go.
struct Target<'a> {
    establishment: &'a Establishment,
    identifier: u64,
    directory: String,
    append_only_if_missing: bool,
}

/// Walk an establishment's source directory and unpack every file in it.
///
/// `used` is this task's copy of the pass's used-name registry. It is
/// returned with every name allocated here added, for the caller to merge
/// back. Recoverable per-file conditions are logged and skipped; storage,
/// archive and metadata failures abort the establishment.
#[instrument(skip_all, fields(root = %root, directory = %establishment.source_directory_name))]
pub async fn process_establishment(
    ctx: &Context,
    root: &str,
    establishment: &Establishment,
    mut used: UsedNames,
    append_only_if_missing: bool,
    ct: &CancellationToken,
) -> Result<UsedNames> {
    let (Some(identifier), Some(directory)) = (establishment.identifier, establishment.destination_directory()) else {
        exn::bail!(ErrorKind::MissingIdentifier(establishment.source_directory_name.clone()));
    };
    let target = Target { establishment, identifier, directory, append_only_if_missing };

    let (mut uploaded, mut skipped) = (0usize, 0usize);
    let path = vec![root.to_string(), establishment.source_directory_name.clone()];
    let mut files = walk(&ctx.source, path, ct);
    while let Some(file) = files.next().await {
        let file = file?;
        match process_file(ctx, &target, &file, &mut used, ct).await? {
            FileOutcome::Uploaded { category, name, .. } => {
                tracing::debug!(file = %file.name, %category, %name, "Unpacked file");
                uploaded += 1;
            },
            FileOutcome::Skipped(reason) => {
                tracing::debug!(file = %file.name, %reason, "Skipped file");
                skipped += 1;
            },
        }
    }
    tracing::info!(destination = %target.directory, uploaded, skipped, "Establishment complete");
    Ok(used)
}

async fn process_file(
    ctx: &Context,
    target: &Target<'_>,
    file: &DocumentFile,
    used: &mut UsedNames,
    ct: &CancellationToken,
) -> Result<FileOutcome> {
    let category = classify(&file.name);
    match category {
        FileCategory::SitePlan | FileCategory::Evidence => {
            let payload = extract(&download(ctx, file, ct).await?)?;
            if category == FileCategory::SitePlan && payload.len() < SITE_PLAN_MIN_BYTES {
                tracing::info!(file = %file.name, bytes = payload.len(), "Site plan too small; assuming misclassified placeholder");
                return Ok(FileOutcome::Skipped(SkipReason::BelowThreshold));
            }
            let identifier = file.name.split('_').next().unwrap_or_default();
            let Some(display_name) = ctx.evidence.lookup(identifier) else {
                tracing::info!(file = %file.name, identifier, "No evidence entry for identifier");
                return Ok(FileOutcome::Skipped(SkipReason::LookupMiss));
            };
            let extension = extension_for(&file.name);
            let desired = strip_illegal(&format!("{display_name}{extension}"));
            let (folder, mime_type, file_type) = match category {
                FileCategory::SitePlan => (SITE_PLAN_FOLDER, PDF_MIME, Some(FileType::SitePlan)),
                _ => (EVIDENCE_FOLDER, ZIP_MIME, None),
            };
            let upload = Upload { category, desired, extension, folder, mime_type, file_type };
            store(ctx, target, file, used, ct, upload, payload).await
        },
        FileCategory::ArchivedReport | FileCategory::Report => {
            if target.append_only_if_missing && used.iter().any(|name| name.contains(&target.establishment.display_name)) {
                tracing::warn!(
                    file = %file.name,
                    establishment = %target.establishment.display_name,
                    "Report already exists for establishment; skipping"
                );
                return Ok(FileOutcome::Skipped(SkipReason::DuplicateName));
            }
            let downloaded = download(ctx, file, ct).await?;
            let payload = match category {
                FileCategory::ArchivedReport => extract(&downloaded)?,
                _ => downloaded,
            };
            let desired = strip_illegal(&format!("{}{DOCX_EXTENSION}", target.establishment.display_name));
            let upload = Upload {
                category,
                desired,
                extension: DOCX_EXTENSION,
                folder: REPORT_FOLDER,
                mime_type: DOCX_MIME,
                file_type: Some(FileType::Report),
            };
            store(ctx, target, file, used, ct, upload, payload).await
        },
        FileCategory::Unrecognized => {
            tracing::warn!(file = %file.name, path = %file.absolute_path, "Unrecognized file; skipping");
            Ok(FileOutcome::Skipped(SkipReason::Unrecognized))
        },
    }
}

struct Upload {
    category: FileCategory,
    desired: String,
    extension: &'static str,
    folder: &'static str,
    mime_type: &'static str,
    file_type: Option<FileType>,
}

/// Name, upload and (for site plans and reports) record a payload.
async fn store(
    ctx: &Context,
    target: &Target<'_>,
    file: &DocumentFile,
    used: &mut UsedNames,
    ct: &CancellationToken,
    upload: Upload,
    payload: Vec<u8>,
) -> Result<FileOutcome> {
    if payload.is_empty() {
        tracing::info!(file = %file.name, "Payload is empty; nothing to upload");
        return Ok(FileOutcome::Skipped(SkipReason::EmptyPayload));
    }
    let name = match claim(&upload.desired, upload.extension, used) {
        Ok(name) => name,
        Err(e) if matches!(e.deref(), ErrorKind::NotAZipFile(..)) => {
            tracing::warn!(file = %file.name, error = %e.deref(), "Could not allocate a unique name; skipping");
            return Ok(FileOutcome::Skipped(SkipReason::NotAZipFile));
        },
        Err(e) => return Err(e),
    };
    let path = vec![target.directory.clone(), upload.folder.to_string()];
    let url = guarded(ct, ctx.destination.upload(&path, &name, upload.mime_type, &payload), || ErrorKind::Storage).await?;
    tracing::info!(file = %file.name, %url, bytes = payload.len(), "Uploaded");

    if let Some(file_type) = upload.file_type {
        let record = DocumentMetadata {
            establishment_id: target.identifier,
            establishment_name: target.establishment.display_name.clone(),
            file_type,
            file_name: decoded_file_name(&url).unwrap_or_else(|| name.clone()),
            file_url: parent_url(&url),
        };
        guarded(ct, ctx.metadata.create_document_metadata(&record), || ErrorKind::Metadata).await?;
    }
    Ok(FileOutcome::Uploaded { category: upload.category, name, url })
}

async fn download(ctx: &Context, file: &DocumentFile, ct: &CancellationToken) -> Result<Vec<u8>> {
    guarded(ct, ctx.source.download(&file.absolute_path), || ErrorKind::Storage).await
}

fn extract(container: &[u8]) -> Result<Vec<u8>> {
    extract_single_entry(container, ENTRY_NAME).or_raise(|| ErrorKind::Archive)
}

/// Last path segment of `url`, percent-decoded.
fn decoded_file_name(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    percent_decode_str(last).decode_utf8().ok().map(|name| name.into_owned())
}

/// `url` with its last path segment removed.
fn parent_url(url: &Url) -> String {
    let mut parent = url.clone();
    if let Ok(mut segments) = parent.path_segments_mut() {
        segments.pop();
    }
    parent.to_string()
}
