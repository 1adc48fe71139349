use crate::config::Config;
use facegraft_core::io::{load_image, remove_transient};
use facegraft_core::{
    process_batch, BatchJob, BatchOptions, FsOutputStore, FsTemplateStore, ModelRegistry,
    ModelState, OutputStore, Pipeline, PipelineError, RenderPath, SwapRequest, SwapResult,
    TemplateStore, TransformOptions,
};
use facegraft_models::ModelKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Caller-facing outcome of one transform.
#[derive(Debug, Serialize)]
pub struct TransformSummary {
    pub success: bool,
    pub output: Option<PathBuf>,
    pub enhanced: bool,
    pub template: Option<String>,
    pub path: Option<RenderPath>,
    pub error: Option<String>,
}

impl TransformSummary {
    pub(crate) fn failed(error: &PipelineError, template: Option<String>) -> Self {
        Self {
            success: false,
            output: None,
            enhanced: false,
            template,
            path: None,
            error: Some(error.to_string()),
        }
    }

    /// Persist the result image (if any) and describe the outcome.
    fn from_result(result: SwapResult, store: &dyn OutputStore) -> Self {
        let SwapResult {
            image,
            success,
            enhanced,
            template,
            error,
            path,
        } = result;

        let stored = image.map(|img| store.put(&img)).transpose();
        match stored {
            Ok(output) => Self {
                success,
                output,
                enhanced,
                template,
                path,
                error,
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to store output");
                Self::failed(&e, template)
            }
        }
    }
}

/// Caller-facing outcome of a batch.
#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub results: Vec<TransformSummary>,
}

impl BatchSummary {
    /// Every target failed for the same reason, before any was processed.
    pub(crate) fn rejected(error: &PipelineError, targets: Vec<String>) -> Self {
        let results: Vec<_> = targets
            .into_iter()
            .map(|t| TransformSummary::failed(error, Some(t)))
            .collect();
        Self {
            total: results.len(),
            succeeded: 0,
            results,
        }
    }
}

/// Point-in-time daemon state.
#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub version: &'static str,
    pub degraded: bool,
    pub model_dir: PathBuf,
    pub models: BTreeMap<ModelKind, ModelState>,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Transform {
        source: PathBuf,
        target: String,
        options: TransformOptions,
        reply: oneshot::Sender<TransformSummary>,
    },
    Batch {
        source: PathBuf,
        targets: Vec<String>,
        options: TransformOptions,
        reply: oneshot::Sender<BatchSummary>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    registry: Arc<ModelRegistry>,
}

impl EngineHandle {
    /// Swap the face in `source` onto the target image or template reference.
    pub async fn transform(
        &self,
        source: PathBuf,
        target: String,
        options: TransformOptions,
    ) -> Result<TransformSummary, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Transform {
                source,
                target,
                options,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Apply the face in `source` to every target, in order.
    pub async fn batch(
        &self,
        source: PathBuf,
        targets: Vec<String>,
        options: TransformOptions,
    ) -> Result<BatchSummary, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Batch {
                source,
                targets,
                options,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Model states, read without waiting on the engine thread.
    pub fn status(&self) -> StatusSummary {
        StatusSummary {
            version: env!("CARGO_PKG_VERSION"),
            degraded: self.registry.is_degraded(),
            model_dir: self.registry.model_dir().to_path_buf(),
            models: self.registry.states(),
        }
    }
}

struct Engine {
    pipeline: Pipeline,
    templates: FsTemplateStore,
    outputs: FsOutputStore,
    batch_workers: usize,
    cleanup_inputs: bool,
}

/// Spawn the engine on a dedicated OS thread.
///
/// Models must already be warmed up; the engine only serves requests.
pub fn spawn_engine(
    registry: Arc<ModelRegistry>,
    config: &Config,
) -> Result<EngineHandle, EngineError> {
    let engine = Engine {
        pipeline: Pipeline::new(Arc::clone(&registry)),
        templates: FsTemplateStore::new(&config.template_dir),
        outputs: FsOutputStore::new(&config.output_dir),
        batch_workers: config.batch_workers,
        cleanup_inputs: config.cleanup_inputs,
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facegraft-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Transform {
                        source,
                        target,
                        options,
                        reply,
                    } => {
                        let _ = reply.send(engine.run_transform(&source, &target, options));
                    }
                    EngineRequest::Batch {
                        source,
                        targets,
                        options,
                        reply,
                    } => {
                        let _ = reply.send(engine.run_batch(&source, targets, options));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx, registry })
}

impl Engine {
    fn run_transform(
        &self,
        source: &Path,
        target: &str,
        options: TransformOptions,
    ) -> TransformSummary {
        let template = Some(target.to_string());
        let request = self
            .take_source(source)
            .and_then(|src| Ok((src, self.templates.load(target)?)))
            .and_then(|(src, tgt)| SwapRequest::new(src, tgt, options));
        self.discard_uploads(&[target.to_string()]);

        match request {
            Ok(request) => {
                let result = self.pipeline.transform(&request.with_template(target));
                TransformSummary::from_result(result, &self.outputs)
            }
            Err(e) => {
                tracing::warn!(template = %target, error = %e, "transform rejected");
                TransformSummary::failed(&e, template)
            }
        }
    }

    fn run_batch(
        &self,
        source: &Path,
        targets: Vec<String>,
        options: TransformOptions,
    ) -> BatchSummary {
        let job = self.take_source(source).and_then(|img| {
            options.validate()?;
            BatchJob::prepare(&self.pipeline, img, targets.clone())
        });

        let summary = match job {
            Ok(job) => {
                let batch_options = BatchOptions {
                    transform: options,
                    workers: self.batch_workers,
                };
                let report = process_batch(&self.pipeline, &self.templates, &job, &batch_options);
                let results: Vec<_> = report
                    .results
                    .into_iter()
                    .map(|r| TransformSummary::from_result(r, &self.outputs))
                    .collect();
                BatchSummary {
                    total: results.len(),
                    succeeded: results.iter().filter(|r| r.success).count(),
                    results,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "batch rejected");
                BatchSummary::rejected(&e, targets.clone())
            }
        };
        self.discard_uploads(&targets);
        summary
    }

    /// Read an uploaded source image, removing it afterwards when configured.
    fn take_source(&self, path: &Path) -> Result<image::RgbImage, PipelineError> {
        let image = load_image(path);
        if self.cleanup_inputs {
            remove_transient(path);
        }
        image
    }

    /// Remove targets that were uploaded by absolute path rather than taken
    /// from the template directory. Templates are never deleted.
    fn discard_uploads(&self, targets: &[String]) {
        if !self.cleanup_inputs {
            return;
        }
        for target in targets {
            let path = Path::new(target);
            if path.is_absolute() && !path.starts_with(self.templates.root()) {
                remove_transient(path);
            }
        }
    }
}

/// Engine over an empty model cache that never reaches the network unless a
/// request gets as far as model loading.
#[cfg(test)]
pub(crate) fn offline_engine(dir: &Path, cleanup_inputs: bool) -> EngineHandle {
    use facegraft_models::{Catalog, HttpFetcher, ModelCache, Provisioner};

    let config = Config {
        model_dir: dir.join("models"),
        catalog_file: None,
        template_dir: dir.join("templates"),
        output_dir: dir.join("output"),
        batch_workers: 2,
        download_timeout_secs: 1,
        max_download_bytes: 1024,
        cleanup_inputs,
        disable_swap: false,
    };
    let provisioner = Provisioner::new(
        ModelCache::new(&config.model_dir),
        Arc::new(HttpFetcher::default()),
    );
    let registry = Arc::new(ModelRegistry::onnx(Catalog::default(), provisioner));
    spawn_engine(registry, &config).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spool(dir: &TempDir) -> (PathBuf, PathBuf) {
        let spool = dir.path().join("spool");
        let templates = dir.path().join("templates");
        std::fs::create_dir_all(&spool).unwrap();
        std::fs::create_dir_all(&templates).unwrap();
        (spool, templates)
    }

    #[tokio::test]
    async fn test_batch_unusable_source_fails_every_target() {
        let dir = TempDir::new().unwrap();
        let handle = offline_engine(dir.path(), false);

        let summary = handle
            .batch(
                dir.path().join("missing.png"),
                vec!["a.png".into(), "b.png".into(), "c.png".into()],
                TransformOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.results.len(), 3);
        let templates: Vec<_> = summary
            .results
            .iter()
            .map(|r| r.template.clone().unwrap())
            .collect();
        assert_eq!(templates, ["a.png", "b.png", "c.png"]);
        assert!(summary.results.iter().all(|r| !r.success && r.error.is_some()));
    }

    #[tokio::test]
    async fn test_cleanup_removes_source_and_uploaded_targets() {
        let dir = TempDir::new().unwrap();
        let (spool, templates) = spool(&dir);
        let source = spool.join("source.png");
        let upload = spool.join("upload.png");
        let kept = templates.join("kept.png");
        for path in [&source, &upload, &kept] {
            std::fs::write(path, b"not an image").unwrap();
        }

        let handle = offline_engine(dir.path(), true);
        let summary = handle
            .batch(
                source.clone(),
                vec![
                    upload.display().to_string(),
                    "kept.png".into(),
                    kept.display().to_string(),
                ],
                TransformOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 0);
        assert!(!source.exists());
        assert!(!upload.exists());
        assert!(kept.exists());
    }

    #[tokio::test]
    async fn test_transform_keeps_inputs_without_cleanup() {
        let dir = TempDir::new().unwrap();
        let (spool, _) = spool(&dir);
        let source = spool.join("source.png");
        let upload = spool.join("upload.png");
        std::fs::write(&source, b"not an image").unwrap();
        std::fs::write(&upload, b"not an image").unwrap();

        let handle = offline_engine(dir.path(), false);
        let summary = handle
            .transform(source.clone(), upload.display().to_string(), TransformOptions::default())
            .await
            .unwrap();

        assert!(!summary.success);
        assert!(summary.error.unwrap().contains("invalid input"));
        assert!(source.exists());
        assert!(upload.exists());
    }

    #[tokio::test]
    async fn test_transform_cleanup_removes_uploaded_target() {
        let dir = TempDir::new().unwrap();
        let (spool, _) = spool(&dir);
        let source = spool.join("source.png");
        let upload = spool.join("upload.png");
        std::fs::write(&source, b"not an image").unwrap();
        std::fs::write(&upload, b"not an image").unwrap();

        let handle = offline_engine(dir.path(), true);
        let summary = handle
            .transform(source.clone(), upload.display().to_string(), TransformOptions::default())
            .await
            .unwrap();

        assert!(!summary.success);
        assert!(!source.exists());
        assert!(!upload.exists());
    }

    #[test]
    fn test_status_before_warm_up() {
        let dir = TempDir::new().unwrap();
        let status = offline_engine(dir.path(), false).status();
        assert!(!status.degraded);
        assert_eq!(status.model_dir, dir.path().join("models"));
        assert!(status.models.values().all(|s| *s == ModelState::Unloaded));
    }
}
