//! Evidence display names.
//!
//! Site plans and evidence files are named after an opaque identifier
//! (`3f2a9c_application_pdf.zip`). A two-column CSV exported alongside the
//! source share maps those identifiers to the names documents should be
//! given on the destination share.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::Read;
use std::path::Path;

/// Immutable identifier to display name table. Lookups ignore case.
#[derive(Debug, Clone, Default)]
pub struct EvidenceIndex {
    entries: HashMap<String, String>,
}

impl EvidenceIndex {
    /// Load the table from a CSV file with a header row.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).or_raise(|| ErrorKind::Evidence(path.display().to_string()))?;
        let index = Self::from_reader(file)?;
        tracing::info!(path = %path.display(), entries = index.len(), "Loaded evidence table");
        Ok(index)
    }

    /// Read CSV from any reader. The first row is a header and is ignored.
    /// Columns beyond the second are ignored too.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new().has_headers(true).flexible(true).trim(csv::Trim::All).from_reader(reader);
        let mut index = Self::default();
        for (row, record) in csv.records().enumerate() {
            // Header is line 1.
            let line = row + 2;
            let record = record.or_raise(|| ErrorKind::Evidence(format!("line {line} is not valid CSV")))?;
            let (Some(identifier), Some(display_name)) = (record.get(0), record.get(1)) else {
                exn::bail!(ErrorKind::Evidence(format!("line {line} has fewer than two columns")));
            };
            if identifier.is_empty() {
                tracing::warn!(line, "Skipping evidence row without identifier");
                continue;
            }
            index.insert(identifier, display_name, line);
        }
        Ok(index)
    }

    fn insert(&mut self, identifier: &str, display_name: &str, line: usize) {
        match self.entries.entry(identifier.to_lowercase()) {
            Entry::Vacant(entry) => {
                entry.insert(display_name.to_string());
            },
            Entry::Occupied(entry) => {
                tracing::warn!(
                    line,
                    identifier,
                    kept = %entry.get(),
                    ignored = display_name,
                    "Duplicate evidence identifier; keeping first"
                );
            },
        }
    }

    /// Display name for `identifier`, ignoring case.
    pub fn lookup(&self, identifier: &str) -> Option<&str> {
        self.entries.get(&identifier.to_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for EvidenceIndex {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut index = Self::default();
        for (line, (identifier, display_name)) in iter.into_iter().enumerate() {
            index.insert(identifier.as_ref().trim(), display_name.as_ref().trim(), line + 1);
        }
        index
    }
}
