//! Locate → Fetch → Activate.
//!
//! A cached artifact is only a hint: it is handed to the activation step and
//! discarded if that fails. Each download attempt writes to a staging path,
//! is checked (checksum, bundle members) and activated from there, and only
//! then renamed into place. A failed attempt leaves nothing behind.

use crate::archive::{self, ArchiveError};
use crate::cache::{self, ModelCache, Staged};
use crate::catalog::{Layout, ModelKind, ModelSpec, Source};
use crate::fetch::{FetchError, Fetcher};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("{model}: all {} candidates failed: {}", .attempts.len(), .attempts.join("; "))]
    Exhausted {
        model: ModelKind,
        attempts: Vec<String>,
    },
    #[error("model cache: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
enum AttemptError {
    #[error("fetch: {0}")]
    Fetch(#[from] FetchError),
    #[error("sha256 mismatch: expected {expected}, got {actual}")]
    Checksum { expected: String, actual: String },
    #[error("bundle: {0}")]
    Archive(#[from] ArchiveError),
    #[error("activation: {0}")]
    Activate(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Provisioning progress reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Downloading,
    Validating,
}

/// Where an activated artifact came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Cache,
    Candidate { index: usize, url: String },
}

/// A model that was located or fetched and then activated.
#[derive(Debug)]
pub struct Provisioned<T> {
    pub path: PathBuf,
    pub origin: Origin,
    pub value: T,
}

pub struct Provisioner {
    cache: ModelCache,
    fetcher: Arc<dyn Fetcher>,
}

impl Provisioner {
    pub fn new(cache: ModelCache, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { cache, fetcher }
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Make `spec` available and activated.
    ///
    /// `activate` receives the artifact path (file or bundle directory) and
    /// either returns the live handle or a reason it could not be opened.
    pub fn provision<T, F>(
        &self,
        spec: &ModelSpec,
        on_phase: &dyn Fn(Phase),
        mut activate: F,
    ) -> Result<Provisioned<T>, ProvisionError>
    where
        F: FnMut(&Path) -> Result<T, String>,
    {
        // Staging names are unique per attempt, so anything left over was
        // abandoned by an interrupted run.
        if let Err(e) = self.cache.purge_staging(spec) {
            tracing::warn!(model = %spec.kind, error = %e, "failed to sweep staging leftovers");
        }

        if let Some(path) = self.cache.locate(spec) {
            on_phase(Phase::Validating);
            let checked = check_layout(spec, &path)
                .and_then(|()| activate(&path).map_err(AttemptError::Activate));
            match checked {
                Ok(value) => {
                    tracing::info!(
                        model = %spec.kind,
                        path = %path.display(),
                        "model activated from cache"
                    );
                    return Ok(Provisioned {
                        path,
                        origin: Origin::Cache,
                        value,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        model = %spec.kind,
                        path = %path.display(),
                        error = %e,
                        "cached model rejected; discarding and re-fetching"
                    );
                    if let Err(e) = cache::remove_path(&path) {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "failed to discard cached model"
                        );
                    }
                }
            }
        }

        self.cache.ensure_root()?;

        let mut attempts = Vec::with_capacity(spec.candidates.len());
        for (index, source) in spec.candidates.iter().enumerate() {
            tracing::info!(
                model = %spec.kind,
                attempt = index + 1,
                of = spec.candidates.len(),
                url = %source.url,
                "fetching model"
            );
            on_phase(Phase::Downloading);

            match self.attempt(spec, source, on_phase, &mut activate) {
                Ok((path, value)) => {
                    tracing::info!(
                        model = %spec.kind,
                        path = %path.display(),
                        url = %source.url,
                        "model installed"
                    );
                    return Ok(Provisioned {
                        path,
                        origin: Origin::Candidate {
                            index,
                            url: source.url.clone(),
                        },
                        value,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        model = %spec.kind,
                        url = %source.url,
                        error = %e,
                        "candidate failed"
                    );
                    attempts.push(format!("{}: {e}", source.url));
                }
            }
        }

        Err(ProvisionError::Exhausted {
            model: spec.kind,
            attempts,
        })
    }

    fn attempt<T, F>(
        &self,
        spec: &ModelSpec,
        source: &Source,
        on_phase: &dyn Fn(Phase),
        activate: &mut F,
    ) -> Result<(PathBuf, T), AttemptError>
    where
        F: FnMut(&Path) -> Result<T, String>,
    {
        let download = Staged::new(self.cache.staging_path(spec, "part"));
        {
            let mut out = BufWriter::new(File::create(download.path())?);
            let bytes = self.fetcher.fetch(source, &mut out)?;
            out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
            tracing::debug!(model = %spec.kind, bytes, "download complete");
        }

        on_phase(Phase::Validating);
        if let Some(expected) = &source.sha256 {
            let actual = sha256_file(download.path())?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(AttemptError::Checksum {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        match &spec.layout {
            Layout::SingleFile => {
                let value = activate(download.path()).map_err(AttemptError::Activate)?;
                let installed = self.cache.install(download.path(), spec)?;
                download.disarm();
                Ok((installed, value))
            }
            Layout::Bundle { required } => {
                let extracted = Staged::new(self.cache.staging_path(spec, "extract"));
                let root = archive::extract_bundle(download.path(), extracted.path())?;
                drop(download);
                archive::check_members(&root, required)?;
                let value = activate(&root).map_err(AttemptError::Activate)?;
                let installed = self.cache.install(&root, spec)?;
                // `extracted` may still hold an emptied wrapper directory; let it drop.
                Ok((installed, value))
            }
        }
    }
}

fn check_layout(spec: &ModelSpec, path: &Path) -> Result<(), AttemptError> {
    if let Layout::Bundle { required } = &spec.layout {
        archive::check_members(path, required)?;
    }
    Ok(())
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    std::io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
