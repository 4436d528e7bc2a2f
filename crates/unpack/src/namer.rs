//! Collision-free destination names.

use crate::error::{ErrorKind, Result};
use std::collections::BTreeSet;

/// Destination file names already allocated within a pass.
pub type UsedNames = BTreeSet<String>;

const ILLEGAL_CHARACTERS: [char; 8] = ['/', '\\', ':', '|', '<', '>', '*', '?'];

/// Number `desired` so that it is not in `used`, register the result and
/// return it.
///
/// The number goes in front of the first occurrence of `extension_marker`:
/// `Plan.pdf` becomes `Plan_1.pdf`, then `Plan_2.pdf`, and so on. Fails with
/// [`ErrorKind::NotAZipFile`] if the marker is empty or missing.
///
/// # Examples
///
/// ```
/// use cdc_unpack::namer::{UsedNames, allocate};
///
/// let mut used = UsedNames::new();
/// assert_eq!(allocate("Plan.pdf", ".pdf", &mut used).unwrap(), "Plan_1.pdf");
/// assert_eq!(allocate("Plan.pdf", ".pdf", &mut used).unwrap(), "Plan_2.pdf");
/// assert!(allocate("Plan", ".pdf", &mut used).is_err());
/// ```
pub fn allocate(desired: &str, extension_marker: &str, used: &mut UsedNames) -> Result<String> {
    let split = match extension_marker {
        "" => None,
        marker => desired.find(marker),
    };
    let Some(split) = split else {
        exn::bail!(ErrorKind::NotAZipFile(desired.to_string(), extension_marker.to_string()));
    };
    let (base, extension) = desired.split_at(split);
    let candidate = (1u64..)
        .map(|n| format!("{base}_{n}{extension}"))
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_default();
    used.insert(candidate.clone());
    Ok(candidate)
}

/// Register `desired` unchanged if it is free, otherwise [`allocate`] a
/// numbered variant.
pub fn claim(desired: &str, extension_marker: &str, used: &mut UsedNames) -> Result<String> {
    if used.insert(desired.to_string()) {
        return Ok(desired.to_string());
    }
    allocate(desired, extension_marker, used)
}

/// Remove characters that no destination share accepts in a file name,
/// keeping everything else in order.
pub fn strip_illegal(name: &str) -> String {
    name.chars().filter(|c| !ILLEGAL_CHARACTERS.contains(c)).collect()
}
