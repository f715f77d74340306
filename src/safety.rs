//! Safety checks run before the map file is written.
//!
//! Writing the HTML output is a plain overwrite, so the target must never be
//! one of the files the run reads from.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::render::with_html_extension;

/// Validates that the map output path is safe to overwrite.
///
/// Checks:
/// - Output (after the `.html` suffix is applied) cannot be a directory
/// - Output cannot be the same file as any of the provided source paths
///
/// Returns the path that will actually be written.
pub fn validate_output_path(output: &Path, source_paths: &[&Path]) -> Result<PathBuf> {
    let target = with_html_extension(output);

    if target.is_dir() {
        return Err(Error::Configuration(format!(
            "Safety check failed: output '{}' is a directory",
            target.display()
        )));
    }

    for source in source_paths {
        if same_file(&target, source) {
            return Err(Error::Configuration(format!(
                "Safety check failed: output '{}' cannot be the same as source '{}'",
                target.display(),
                source.display()
            )));
        }
    }

    Ok(target)
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_valid_output() {
        let output = PathBuf::from("/tmp/trip.html");
        let source = PathBuf::from("/data/trip.csv");
        assert_eq!(
            validate_output_path(&output, &[&source]).unwrap(),
            PathBuf::from("/tmp/trip.html")
        );
    }

    #[test]
    fn test_extension_applied_before_check() {
        let output = PathBuf::from("/tmp/trip");
        assert_eq!(
            validate_output_path(&output, &[]).unwrap(),
            PathBuf::from("/tmp/trip.html")
        );
    }

    #[test]
    fn test_output_equals_source() {
        let path = PathBuf::from("/data/places.html");
        let result = validate_output_path(&path, &[&path]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot be the same as source"));
    }

    #[test]
    fn test_output_equals_source_through_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("places.html");
        fs::write(&source, "link;;open_time;;close_time\n").unwrap();
        let sneaky = dir.path().join(".").join("places.html");
        assert!(validate_output_path(&sneaky, &[&source]).is_err());
    }

    #[test]
    fn test_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("maps.html");
        fs::create_dir_all(&out).unwrap();
        let result = validate_output_path(&out, &[]);
        assert!(result.unwrap_err().to_string().contains("is a directory"));
    }
}
