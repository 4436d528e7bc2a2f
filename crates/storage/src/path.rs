//! Path validation and security utilities.
//!
//! Directory paths are passed around as segment lists (`["CDC", "12345 Some
//! School (CDC)", "Site Plan"]`) rather than slash-joined strings, because
//! establishment names routinely contain characters that mean something to a
//! filesystem. Every segment is validated before it touches a backend.

use crate::error::{ErrorKind, Result};
use std::path::PathBuf;

/// Validates a single path segment or file name.
///
/// Rejects empty names, `.` and `..`, and anything containing a path
/// separator or a null byte. Leading and trailing whitespace is preserved;
/// it's legal (if unwise) on every share we care about.
///
/// # Examples
///
/// ```
/// use cdc_storage::validate_file_name;
/// assert!(validate_file_name("Front Elevation.pdf").is_ok());
/// assert!(validate_file_name("12345 Example School (CDC)").is_ok());
/// assert!(validate_file_name("..").is_err());
/// assert!(validate_file_name("a/b").is_err());
/// ```
pub fn validate_file_name(name: &str) -> Result<&str> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        exn::bail!(ErrorKind::InvalidPath(name.to_string()));
    }
    Ok(name)
}

/// Validates a directory path given as segments, returning it as a relative
/// [`PathBuf`].
///
/// An empty segment list is the share root and is valid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use cdc_storage::validate_path;
/// assert_eq!(validate_path(&["CDC", "Site Plan"]).unwrap(), Path::new("CDC/Site Plan"));
/// assert_eq!(validate_path::<&str>(&[]).unwrap(), Path::new(""));
/// assert!(validate_path(&["CDC", "../etc"]).is_err());
/// ```
pub fn validate<S: AsRef<str>>(segments: &[S]) -> Result<PathBuf> {
    let mut path = PathBuf::new();
    for segment in segments {
        path.push(validate_file_name(segment.as_ref())?);
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::Path;

    #[rstest]
    #[case("abc_application_pdf.zip")]
    #[case("12345 Example School (CDC)")]
    #[case(" padded ")]
    #[case("report.docx")]
    fn test_valid_names(#[case] name: &str) {
        assert_eq!(validate_file_name(name).unwrap(), name);
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("..")]
    #[case("a/b")]
    #[case("a\\b")]
    #[case("a\0b")]
    fn test_invalid_names(#[case] name: &str) {
        assert!(validate_file_name(name).is_err());
    }

    #[test]
    fn test_segments_join() {
        let path = validate(&["CDC", "12345 Example School (CDC)", "Site Plan"]).unwrap();
        assert_eq!(path, Path::new("CDC/12345 Example School (CDC)/Site Plan"));
    }

    #[test]
    fn test_root_is_valid() {
        let empty: [String; 0] = [];
        assert_eq!(validate(&empty).unwrap(), PathBuf::new());
    }

    #[test]
    fn test_traversal_rejected() {
        assert!(validate(&["CDC", ".."]).is_err());
        assert!(validate(&["..", "etc"]).is_err());
        assert!(validate(&["CDC", ""]).is_err());
    }
}
