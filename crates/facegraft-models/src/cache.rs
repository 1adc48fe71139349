//! On-disk model cache.
//!
//! Layout: one directory per bundle and one flat file per single-file model,
//! both under their canonical names. Staging artifacts live next to their
//! final location as hidden `.{name}.{uuid}.part` entries so the final
//! rename never crosses a filesystem boundary.

use crate::catalog::{Layout, ModelSpec};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ModelCache {
    root: PathBuf,
}

impl ModelCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final location of a model in the cache.
    pub fn path_for(&self, spec: &ModelSpec) -> PathBuf {
        self.root.join(&spec.name)
    }

    /// Cached artifact for `spec`, if something of the right shape exists.
    ///
    /// This is only a hint: the caller still has to activate it.
    pub fn locate(&self, spec: &ModelSpec) -> Option<PathBuf> {
        let path = self.path_for(spec);
        let present = match &spec.layout {
            Layout::SingleFile => path.is_file(),
            Layout::Bundle { .. } => path.is_dir(),
        };
        present.then_some(path)
    }

    /// A fresh staging path for `spec` with the given suffix.
    pub fn staging_path(&self, spec: &ModelSpec, suffix: &str) -> PathBuf {
        self.root
            .join(format!(".{}.{}.{suffix}", spec.name, uuid::Uuid::new_v4().simple()))
    }

    /// Remove staging leftovers for `spec` from runs that never finished.
    ///
    /// Returns how many entries were removed. A missing cache root is empty.
    pub fn purge_staging(&self, spec: &ModelSpec) -> io::Result<usize> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let prefix = format!(".{}.", spec.name);
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let staging = name.starts_with(&prefix)
                && (name.ends_with(".part") || name.ends_with(".extract"));
            if staging {
                remove_path(&entry.path())?;
                tracing::info!(path = %entry.path().display(), "removed stale staging artifact");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Move a staged artifact to its final location, replacing what was there.
    pub fn install(&self, staged: &Path, spec: &ModelSpec) -> io::Result<PathBuf> {
        let target = self.path_for(spec);
        if target.exists() {
            remove_path(&target)?;
        }
        std::fs::rename(staged, &target)?;
        Ok(target)
    }

    pub fn ensure_root(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }
}

/// Remove a file or directory tree.
pub fn remove_path(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// A staging artifact that is deleted on drop unless committed.
pub(crate) struct Staged {
    path: PathBuf,
    armed: bool,
}

impl Staged {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Stop tracking the path; it has been moved or is kept on purpose.
    pub(crate) fn disarm(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        if !self.armed || !self.path.exists() {
            return;
        }
        if let Err(e) = remove_path(&self.path) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove staging artifact"
            );
        }
    }
}
