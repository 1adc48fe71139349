//! One source identity applied to many targets.
//!
//! Targets run on a bounded rayon pool. Results keep input order and a
//! failing target only produces an error entry for itself.

use crate::error::PipelineError;
use crate::io::load_image;
use crate::pipeline::Pipeline;
use crate::types::{FaceDescriptor, SwapResult, TransformOptions};
use image::RgbImage;
use rayon::prelude::*;
use std::path::{Component, Path, PathBuf};

/// Resolves a target reference to an image.
pub trait TemplateStore: Send + Sync {
    fn load(&self, reference: &str) -> Result<RgbImage, PipelineError>;
}

/// Templates stored as image files under a root directory.
pub struct FsTemplateStore {
    root: PathBuf,
}

impl FsTemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `reference`. Absolute references are used as-is; relative
    /// ones may not climb out of the root.
    pub fn resolve(&self, reference: &str) -> Result<PathBuf, PipelineError> {
        let path = Path::new(reference);
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(PipelineError::input(format!(
                "template reference escapes store: {reference}"
            )));
        }
        Ok(self.root.join(path))
    }
}

impl TemplateStore for FsTemplateStore {
    fn load(&self, reference: &str) -> Result<RgbImage, PipelineError> {
        load_image(&self.resolve(reference)?)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub transform: TransformOptions,
    /// Upper bound on concurrently processed targets.
    ///
    /// Each model holds a single session behind a lock, so workers overlap
    /// decoding, alignment and blending while inference runs one call at a
    /// time per model.
    pub workers: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            transform: TransformOptions::default(),
            workers: 2,
        }
    }
}

pub struct BatchJob {
    pub source_image: RgbImage,
    pub source_face: FaceDescriptor,
    pub targets: Vec<String>,
}

impl BatchJob {
    /// Locate the source face once for the whole batch.
    pub fn prepare(
        pipeline: &Pipeline,
        source_image: RgbImage,
        targets: Vec<String>,
    ) -> Result<Self, PipelineError> {
        let source_face = pipeline.source_face(&source_image)?;
        Ok(Self {
            source_image,
            source_face,
            targets,
        })
    }
}

pub struct BatchReport {
    /// One entry per target, in input order.
    pub results: Vec<SwapResult>,
    pub succeeded: usize,
}

/// Transform every target of `job`.
pub fn process_batch(
    pipeline: &Pipeline,
    store: &dyn TemplateStore,
    job: &BatchJob,
    options: &BatchOptions,
) -> BatchReport {
    let total = job.targets.len();
    let run_one = |index: usize, reference: &String| {
        let result = process_target(pipeline, store, job, reference, &options.transform);
        tracing::info!(
            template = %reference,
            index = index + 1,
            of = total,
            success = result.success,
            "batch target processed"
        );
        result
    };

    let workers = options.workers.max(1);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build();
    let results: Vec<SwapResult> = match pool {
        Ok(pool) => pool.install(|| {
            job.targets
                .par_iter()
                .enumerate()
                .map(|(i, r)| run_one(i, r))
                .collect()
        }),
        Err(e) => {
            tracing::warn!(error = %e, "batch worker pool unavailable; running sequentially");
            job.targets.iter().enumerate().map(|(i, r)| run_one(i, r)).collect()
        }
    };

    let succeeded = results.iter().filter(|r| r.success).count();
    tracing::info!(total, succeeded, "batch complete");
    BatchReport { results, succeeded }
}

fn process_target(
    pipeline: &Pipeline,
    store: &dyn TemplateStore,
    job: &BatchJob,
    reference: &str,
    options: &TransformOptions,
) -> SwapResult {
    let template = Some(reference.to_string());
    let outcome = store
        .load(reference)
        .and_then(|target| pipeline.render(&job.source_image, &job.source_face, &target, options));

    match outcome {
        Ok(r) => SwapResult::ok(r.image, r.enhanced, r.path, template),
        Err(e) => {
            tracing::warn!(template = %reference, error = %e, "batch target failed");
            SwapResult::failed(&e, template)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_registry, portrait, write_pngs};
    use crate::types::RenderPath;
    use facegraft_models::ModelKind;
    use image::RgbImage;
    use tempfile::TempDir;

    fn pipeline(dir: &TempDir) -> Pipeline {
        let models = dir.path().join("models");
        std::fs::create_dir_all(&models).unwrap();
        Pipeline::new(fake_registry(&models, &[ModelKind::Detection, ModelKind::Swap]))
    }

    #[test]
    fn test_corrupt_target_isolated() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        let templates = dir.path().join("templates");
        std::fs::create_dir_all(&templates).unwrap();

        write_pngs(
            &templates,
            &[
                ("a.png", portrait(120, 100, 10.0, 10.0)),
                ("c.png", portrait(140, 90, 50.0, 20.0)),
                ("d.png", portrait(100, 100, 30.0, 30.0)),
            ],
        );
        std::fs::write(templates.join("b.png"), b"\x89PNG truncated").unwrap();

        let job = BatchJob::prepare(
            &pipeline,
            portrait(100, 100, 20.0, 20.0),
            ["a.png", "b.png", "c.png", "d.png"].map(String::from).to_vec(),
        )
        .unwrap();
        let options = BatchOptions { workers: 3, ..Default::default() };
        let report = process_batch(&pipeline, &FsTemplateStore::new(&templates), &job, &options);

        assert_eq!(report.results.len(), 4);
        assert_eq!(report.succeeded, 3);
        assert!(!report.results[1].success);
        assert!(report.results[1].error.is_some());

        // Order follows the input, not completion.
        let refs: Vec<_> = report.results.iter().map(|r| r.template.clone().unwrap()).collect();
        assert_eq!(refs, ["a.png", "b.png", "c.png", "d.png"]);
        assert_eq!(report.results[2].image.as_ref().unwrap().dimensions(), (140, 90));
        assert!(report
            .results
            .iter()
            .filter(|r| r.success)
            .all(|r| r.path == Some(RenderPath::Swapped)));
    }

    #[test]
    fn test_faceless_and_missing_targets() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        write_pngs(
            dir.path(),
            &[("blank.png", RgbImage::new(32, 32)), ("ok.png", portrait(80, 80, 10.0, 10.0))],
        );

        let job = BatchJob::prepare(
            &pipeline,
            portrait(100, 100, 20.0, 20.0),
            vec!["blank.png".into(), "gone.png".into(), "ok.png".into()],
        )
        .unwrap();
        let store = FsTemplateStore::new(dir.path());
        let report = process_batch(&pipeline, &store, &job, &BatchOptions::default());

        assert_eq!(report.succeeded, 1);
        assert!(report.results[0].error.as_ref().unwrap().contains("no face"));
        assert!(report.results[2].success);
    }

    #[test]
    fn test_prepare_requires_source_face() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        let err = BatchJob::prepare(&pipeline, RgbImage::new(50, 50), vec![]).err().unwrap();
        assert!(matches!(err, PipelineError::Input(_)));
    }

    #[test]
    fn test_resolve_rejects_parent_dirs() {
        let store = FsTemplateStore::new("/srv/templates");
        assert_eq!(store.resolve("x/y.png").unwrap(), PathBuf::from("/srv/templates/x/y.png"));
        assert!(store.resolve("../etc/passwd").is_err());
    }
}
