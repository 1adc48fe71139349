//! Locate → transplant (or demo) → enhance.

use crate::demo;
use crate::enhancer::{QualityEnhancer, StrategyKind};
use crate::error::PipelineError;
use crate::locator::primary_face;
use crate::registry::{LoadResult, ModelRegistry};
use crate::types::{FaceDescriptor, RenderPath, SwapRequest, SwapResult, TransformOptions};
use image::RgbImage;
use std::sync::{Arc, OnceLock};

/// Image produced for one target.
pub struct Rendered {
    pub image: RgbImage,
    pub enhanced: bool,
    pub path: RenderPath,
}

pub struct Pipeline {
    registry: Arc<ModelRegistry>,
    enhancer: OnceLock<QualityEnhancer>,
}

impl Pipeline {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            enhancer: OnceLock::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Run one transform. Failures are reported in the result, never raised.
    pub fn transform(&self, request: &SwapRequest) -> SwapResult {
        let template = request.template.clone();
        let outcome = self
            .source_face(&request.source)
            .and_then(|face| {
                self.render(&request.source, &face, &request.target, &request.options)
            });

        match outcome {
            Ok(r) => SwapResult::ok(r.image, r.enhanced, r.path, template),
            Err(e) => {
                tracing::warn!(template = ?template, error = %e, "transform failed");
                SwapResult::failed(&e, template)
            }
        }
    }

    /// Primary face of a source image.
    pub fn source_face(&self, source: &RgbImage) -> Result<FaceDescriptor, PipelineError> {
        let locator = self.registry.load_detection_model()?;
        primary_face(locator.as_ref(), source, "source")
    }

    /// Transform `target` with an already located source face.
    pub fn render(
        &self,
        source: &RgbImage,
        source_face: &FaceDescriptor,
        target: &RgbImage,
        options: &TransformOptions,
    ) -> Result<Rendered, PipelineError> {
        options.validate()?;
        let locator = self.registry.load_detection_model()?;
        let target_face = primary_face(locator.as_ref(), target, "target")?;

        let swapper = if self.registry.is_degraded() {
            None
        } else {
            self.registry.load_swap_model().ok()
        };

        let Some(swapper) = swapper else {
            return Ok(Rendered {
                image: demo::render_demo(source, target, source_face, &target_face),
                enhanced: false,
                path: RenderPath::Demo,
            });
        };

        let swapped = swapper.swap(target, &target_face, source_face, true)?;
        let (image, enhanced) = if options.enhance {
            self.enhancer().enhance(&swapped, options.method, options.strength)
        } else {
            (swapped, false)
        };

        Ok(Rendered {
            image,
            enhanced,
            path: RenderPath::Swapped,
        })
    }

    fn enhancer(&self) -> &QualityEnhancer {
        self.enhancer.get_or_init(|| {
            let load = |kind| match self.registry.load_restoration_model(kind) {
                LoadResult::Loaded(strategy) => Some(strategy),
                LoadResult::Unavailable(_) => None,
            };
            QualityEnhancer::new(load(StrategyKind::Primary), load(StrategyKind::Secondary))
        })
    }
}
