//! Zip extraction for multi-file model bundles.

use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("zip: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("bundle is missing required file {0}")]
    MissingMember(String),
}

/// Extract `archive` into `dest` (created if needed).
///
/// Returns the directory that actually holds the bundle contents: archives
/// that wrap everything in a single top-level folder are unwrapped.
pub fn extract_bundle(archive: &Path, dest: &Path) -> Result<PathBuf, ArchiveError> {
    std::fs::create_dir_all(dest)?;
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    zip.extract(dest)?;
    Ok(bundle_root(dest)?)
}

fn bundle_root(dir: &Path) -> std::io::Result<PathBuf> {
    let entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    if let [only] = entries.as_slice() {
        if only.file_type()?.is_dir() {
            return Ok(only.path());
        }
    }
    Ok(dir.to_path_buf())
}

/// Check that every `required` file exists directly under `root`.
pub fn check_members(root: &Path, required: &[String]) -> Result<(), ArchiveError> {
    for member in required {
        if !root.join(member).is_file() {
            return Err(ArchiveError::MissingMember(member.clone()));
        }
    }
    Ok(())
}
