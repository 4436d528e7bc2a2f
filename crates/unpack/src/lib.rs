//! Unpacking establishment document archives.
//!
//! The source share holds one directory per root (`CDC`, `CDCFE`, ...), each
//! containing one directory per establishment. Every establishment directory
//! is walked recursively; its files are classified by name, unwrapped from
//! their single-entry ZIP containers where needed, given unique human
//! readable names and uploaded to the destination share under
//! `{identifier:05} {name} ({category})/{folder}/`. Site plans and reports are
//! recorded with the metadata sink as they are uploaded.
//!
//! [`UnpackRoutine`] drives the whole run; [`process::process_establishment`]
//! does the work for a single establishment.

mod cancel;
pub mod classify;
pub mod error;
pub mod establishment;
pub mod evidence;
pub mod namer;
pub mod process;
pub mod routine;
pub mod walk;

pub use crate::establishment::Establishment;
pub use crate::evidence::EvidenceIndex;
pub use crate::routine::{EstablishmentFailure, PassReport, Progress, RootPass, RunReport, Status, UnpackRoutine};
use cdc_metadata::MetadataHandle;
use cdc_storage::BackendHandle;
use std::sync::Arc;

/// Collaborators shared by every establishment task.
pub struct Context {
    pub source: BackendHandle,
    pub destination: BackendHandle,
    pub metadata: MetadataHandle,
    /// Identifier to display name table for site plans and evidence.
    pub evidence: Arc<EvidenceIndex>,
}
