//! Establishment directory names.
//!
//! Source directories are named `"{identifier} {display name} ({category})"`,
//! for example `12345 Example School (CDC)`. Older directories separate the
//! identifier with a dash (`12345 - Example School (CDC)`) and some have no
//! category at all.

use std::fmt::Write;

/// An establishment parsed from its source directory name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Establishment {
    pub source_directory_name: String,
    /// `None` when the leading token isn't a number. Such establishments are
    /// never processed.
    pub identifier: Option<u64>,
    pub display_name: String,
    pub category: Option<String>,
}

impl Establishment {
    /// Parse a raw directory name. Never fails; an unparseable identifier is
    /// logged and left empty.
    pub fn parse(directory: &str) -> Self {
        let tokens: Vec<&str> = directory.split(' ').collect();
        let first = tokens.first().copied().unwrap_or_default();
        let identifier = first.parse::<u64>().ok();
        if identifier.is_none() {
            tracing::warn!(directory, token = first, "Could not parse establishment identifier");
        }
        let category = tokens
            .last()
            .filter(|_| tokens.len() > 1)
            .and_then(|last| last.strip_prefix('(').and_then(|rest| rest.strip_suffix(')')))
            .map(str::to_string);

        let mut display_name = directory;
        if identifier.is_some() {
            display_name = &display_name[first.len()..];
        }
        if let (Some(_), Some(last)) = (&category, tokens.last()) {
            display_name = &display_name[..display_name.len() - last.len()];
        }
        let display_name = display_name.trim();
        let display_name = display_name.strip_prefix("- ").unwrap_or(display_name).trim();

        Self {
            source_directory_name: directory.to_string(),
            identifier,
            display_name: display_name.to_string(),
            category,
        }
    }

    /// Name of the establishment's directory on the destination share, e.g.
    /// `00042 Example School (CDC)`. `None` without an identifier.
    pub fn destination_directory(&self) -> Option<String> {
        let identifier = self.identifier?;
        let mut name = format!("{identifier:05} {}", self.display_name);
        if let Some(category) = &self.category {
            _ = write!(name, " ({category})");
        }
        Some(name)
    }
}
