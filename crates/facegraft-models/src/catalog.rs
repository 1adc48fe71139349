//! Model catalog: what each model kind is called on disk and where to get it.
//!
//! The built-in catalog can be overridden per model kind from a TOML file:
//!
//! ```toml
//! [[model]]
//! kind = "swap"
//!
//! [[model.candidates]]
//! url = "https://mirror.example/inswapper_128.onnx"
//! auth_env = "HF_TOKEN"
//! sha256 = "e4a3f08c753cb72d04e10aa0f7dbe3deebbf39567d4ead6dce08e98aa49e16af"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid catalog TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("model {0} has no download candidates")]
    NoCandidates(ModelKind),
}

/// Kinds of model the pipeline knows how to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// SCRFD detector + ArcFace identity model, shipped as one bundle.
    Detection,
    /// inswapper face swap model.
    Swap,
    /// GFPGAN restoration model.
    RestorePrimary,
    /// CodeFormer restoration model.
    RestoreSecondary,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::Detection,
        ModelKind::Swap,
        ModelKind::RestorePrimary,
        ModelKind::RestoreSecondary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Detection => "detection",
            ModelKind::Swap => "swap",
            ModelKind::RestorePrimary => "restore_primary",
            ModelKind::RestoreSecondary => "restore_secondary",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk shape of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// A single flat file, downloaded as-is.
    SingleFile,
    /// A directory extracted from a zip archive; `required` files must exist.
    Bundle { required: Vec<String> },
}

/// One download candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    /// Extra request headers sent to this candidate only.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Environment variable holding a bearer token for this candidate.
    #[serde(default)]
    pub auth_env: Option<String>,
    /// Expected lowercase hex SHA-256 of the downloaded artifact.
    #[serde(default)]
    pub sha256: Option<String>,
}

impl Source {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            auth_env: None,
            sha256: None,
        }
    }

    pub fn with_auth_env(mut self, var: impl Into<String>) -> Self {
        self.auth_env = Some(var.into());
        self
    }

    /// Headers for a request to this candidate, including the bearer token
    /// when `auth_env` names a set, non-empty variable.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(token) = self
            .auth_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.trim().is_empty())
        {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token.trim())));
        }

        headers
    }
}

/// Everything needed to locate and fetch one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub kind: ModelKind,
    /// Canonical cache name (directory for bundles, file name otherwise).
    pub name: String,
    pub layout: Layout,
    /// Ordered mirrors; tried first to last.
    pub candidates: Vec<Source>,
}

/// The set of models the registry can provision.
#[derive(Debug, Clone)]
pub struct Catalog {
    specs: BTreeMap<ModelKind, ModelSpec>,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    model: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    kind: ModelKind,
    candidates: Vec<Source>,
}

const FACEFUSION_ASSETS: &str = "https://github.com/facefusion/facefusion-assets/releases/download/models";

impl Default for Catalog {
    fn default() -> Self {
        let specs = [
            ModelSpec {
                kind: ModelKind::Detection,
                name: "buffalo_l".into(),
                layout: Layout::Bundle {
                    required: vec!["det_10g.onnx".into(), "w600k_r50.onnx".into()],
                },
                candidates: vec![
                    Source::new("https://github.com/deepinsight/insightface/releases/download/v0.7/buffalo_l.zip"),
                    Source::new("https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l.zip")
                        .with_auth_env("HF_TOKEN"),
                ],
            },
            ModelSpec {
                kind: ModelKind::Swap,
                name: "inswapper_128.onnx".into(),
                layout: Layout::SingleFile,
                candidates: vec![
                    Source::new("https://huggingface.co/ezioruan/inswapper_128.onnx/resolve/main/inswapper_128.onnx")
                        .with_auth_env("HF_TOKEN"),
                    Source::new(format!("{FACEFUSION_ASSETS}/inswapper_128.onnx")),
                ],
            },
            ModelSpec {
                kind: ModelKind::RestorePrimary,
                name: "GFPGANv1.4.onnx".into(),
                layout: Layout::SingleFile,
                candidates: vec![Source::new(format!("{FACEFUSION_ASSETS}/gfpgan_1.4.onnx"))],
            },
            ModelSpec {
                kind: ModelKind::RestoreSecondary,
                name: "codeformer.onnx".into(),
                layout: Layout::SingleFile,
                candidates: vec![Source::new(format!("{FACEFUSION_ASSETS}/codeformer.onnx"))],
            },
        ];

        Self {
            specs: specs.into_iter().map(|s| (s.kind, s)).collect(),
        }
    }
}

impl Catalog {
    /// Look up the spec for a model kind.
    pub fn spec(&self, kind: ModelKind) -> &ModelSpec {
        // Every kind is inserted by `Default` and overrides only replace candidates.
        &self.specs[&kind]
    }

    pub fn specs(&self) -> impl Iterator<Item = &ModelSpec> {
        self.specs.values()
    }

    /// Replace the candidate list for `kind`.
    pub fn set_candidates(&mut self, kind: ModelKind, candidates: Vec<Source>) {
        if let Some(spec) = self.specs.get_mut(&kind) {
            spec.candidates = candidates;
        }
    }

    /// Apply overrides from a TOML document on top of this catalog.
    pub fn apply_toml(&mut self, src: &str) -> Result<(), CatalogError> {
        let file: CatalogFile = toml::from_str(src)?;
        for entry in file.model {
            if entry.candidates.is_empty() {
                return Err(CatalogError::NoCandidates(entry.kind));
            }
            tracing::info!(
                model = %entry.kind,
                candidates = entry.candidates.len(),
                "catalog override applied"
            );
            self.set_candidates(entry.kind, entry.candidates);
        }
        Ok(())
    }

    /// Built-in catalog with overrides from `path` applied.
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let src = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut catalog = Self::default();
        catalog.apply_toml(&src)?;
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_covers_all_kinds() {
        let catalog = Catalog::default();
        for kind in ModelKind::ALL {
            let spec = catalog.spec(kind);
            assert_eq!(spec.kind, kind);
            assert!(!spec.candidates.is_empty(), "{kind} has no candidates");
        }
        assert!(matches!(
            catalog.spec(ModelKind::Detection).layout,
            Layout::Bundle { .. }
        ));
        assert_eq!(catalog.spec(ModelKind::Swap).name, "inswapper_128.onnx");
    }

    #[test]
    fn test_apply_toml_replaces_candidates() {
        let mut catalog = Catalog::default();
        catalog
            .apply_toml(
                r#"
                [[model]]
                kind = "swap"

                [[model.candidates]]
                url = "https://a.example/swap.onnx"

                [[model.candidates]]
                url = "https://b.example/swap.onnx"
                sha256 = "abc"
                headers = { "X-Mirror" = "b" }
                "#,
            )
            .unwrap();

        let spec = catalog.spec(ModelKind::Swap);
        assert_eq!(spec.candidates.len(), 2);
        assert_eq!(spec.candidates[0].url, "https://a.example/swap.onnx");
        assert_eq!(spec.candidates[1].sha256.as_deref(), Some("abc"));
        assert_eq!(spec.candidates[1].headers.get("X-Mirror").map(String::as_str), Some("b"));
        // Canonical name is not overridable.
        assert_eq!(spec.name, "inswapper_128.onnx");
    }

    #[test]
    fn test_apply_toml_rejects_empty_candidates() {
        let mut catalog = Catalog::default();
        let err = catalog
            .apply_toml("[[model]]\nkind = \"detection\"\ncandidates = []\n")
            .unwrap_err();
        assert!(matches!(err, CatalogError::NoCandidates(ModelKind::Detection)));
    }

    #[test]
    fn test_apply_toml_unknown_kind() {
        let mut catalog = Catalog::default();
        let err = catalog.apply_toml("[[model]]\nkind = \"nope\"\ncandidates = []\n");
        assert!(matches!(err, Err(CatalogError::Parse(_))));
    }

    #[test]
    fn test_request_headers_bearer_from_env() {
        let var = "FACEGRAFT_TEST_TOKEN_CATALOG";
        std::env::set_var(var, "secret");
        let mut source = Source::new("https://x.example/m.onnx").with_auth_env(var);
        source.headers.insert("X-Extra".into(), "1".into());

        let headers = source.request_headers();
        assert!(headers.contains(&("X-Extra".to_string(), "1".to_string())));
        assert!(headers.contains(&("Authorization".to_string(), "Bearer secret".to_string())));
        std::env::remove_var(var);
    }

    #[test]
    fn test_request_headers_missing_env() {
        let source = Source::new("https://x.example/m.onnx")
            .with_auth_env("FACEGRAFT_TEST_TOKEN_UNSET_XYZ");
        assert!(source.request_headers().is_empty());
    }
}
