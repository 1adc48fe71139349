use crate::engine::{BatchSummary, EngineHandle, TransformSummary};
use facegraft_core::{PipelineError, TransformOptions};
use std::path::PathBuf;
use zbus::interface;

pub const BUS_NAME: &str = "org.facegraft.Facegraft1";
pub const OBJECT_PATH: &str = "/org/facegraft/Facegraft1";

/// D-Bus interface for the facegraft daemon.
///
/// Bus name: org.facegraft.Facegraft1
/// Object path: /org/facegraft/Facegraft1
///
/// Every method returns a JSON document. Options are a JSON object with
/// `enhance`, `method` (`auto|primary|secondary|basic`) and `strength`;
/// an empty string selects the defaults. Malformed options produce a failed
/// result, not a bus error.
pub struct FacegraftService {
    engine: EngineHandle,
}

impl FacegraftService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn parse_options(options: &str) -> Result<TransformOptions, PipelineError> {
    if options.trim().is_empty() {
        return Ok(TransformOptions::default());
    }
    let parsed: TransformOptions =
        serde_json::from_str(options).map_err(|e| PipelineError::input(format!("options: {e}")))?;
    parsed.validate()?;
    Ok(parsed)
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.facegraft.Facegraft1")]
impl FacegraftService {
    /// Swap the face in the `source` image onto `target` (a path or template reference).
    async fn transform(
        &self,
        source: &str,
        target: &str,
        options: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(source, template = target, "transform requested");
        let summary = match parse_options(options) {
            Ok(options) => self
                .engine
                .transform(PathBuf::from(source), target.to_string(), options)
                .await
                .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?,
            Err(e) => {
                tracing::warn!(error = %e, "transform options rejected");
                TransformSummary::failed(&e, Some(target.to_string()))
            }
        };
        to_json(&summary)
    }

    /// Apply the face in `source` to each target, preserving order.
    async fn batch(
        &self,
        source: &str,
        targets: Vec<String>,
        options: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(source, targets = targets.len(), "batch requested");
        let summary = match parse_options(options) {
            Ok(options) => self
                .engine
                .batch(PathBuf::from(source), targets, options)
                .await
                .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?,
            Err(e) => {
                tracing::warn!(error = %e, "batch options rejected");
                BatchSummary::rejected(&e, targets)
            }
        };
        to_json(&summary)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(&self.engine.status())
    }
}
