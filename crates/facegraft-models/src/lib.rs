//! facegraft-models: model catalog, on-disk cache and provisioning.
//!
//! Provisioning runs in three phases: locate a cached artifact, fetch it from
//! an ordered list of mirrors when missing or corrupt, and hand the staged
//! artifact to a caller-supplied activation step before installing it into
//! the cache with an atomic rename.

pub mod archive;
pub mod cache;
pub mod catalog;
pub mod fetch;
pub mod provision;

use std::path::PathBuf;

pub use cache::ModelCache;
pub use catalog::{Catalog, CatalogError, Layout, ModelKind, ModelSpec, Source};
pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use provision::{Origin, Phase, ProvisionError, Provisioned, Provisioner};

/// Default model cache directory.
///
/// `$XDG_DATA_HOME/facegraft/models`, falling back to
/// `$HOME/.local/share/facegraft/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegraft")
        .join("models")
}
