//! Quality enhancement with a fixed fallback chain.
//!
//! Learned restoration strategies are tried in order and any failure falls
//! through to the next one. The classical strategy always succeeds, so the
//! enhancer never fails the surrounding transform.

use crate::classical;
use crate::error::PipelineError;
use crate::types::EnhanceMethod;
use image::RgbImage;
use serde::Serialize;
use std::sync::Arc;

/// Enhancement strategies in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Primary,
    Secondary,
    Classical,
}

impl StrategyKind {
    /// Whether output of this strategy counts as an applied enhancement.
    pub fn is_learned(self) -> bool {
        !matches!(self, Self::Classical)
    }
}

/// One way of enhancing an image. Output keeps the input's dimensions.
pub trait EnhanceStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;
    fn enhance(&self, image: &RgbImage) -> Result<RgbImage, PipelineError>;
}

/// CLAHE + sharpen, see [`classical::enhance`].
pub struct ClassicalStrategy;

impl EnhanceStrategy for ClassicalStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Classical
    }

    fn enhance(&self, image: &RgbImage) -> Result<RgbImage, PipelineError> {
        Ok(classical::enhance(image))
    }
}

pub struct QualityEnhancer {
    primary: Option<Arc<dyn EnhanceStrategy>>,
    secondary: Option<Arc<dyn EnhanceStrategy>>,
    classical: ClassicalStrategy,
}

impl QualityEnhancer {
    /// Build from whichever learned strategies are available.
    pub fn new(
        primary: Option<Arc<dyn EnhanceStrategy>>,
        secondary: Option<Arc<dyn EnhanceStrategy>>,
    ) -> Self {
        Self {
            primary,
            secondary,
            classical: ClassicalStrategy,
        }
    }

    /// Strategies to try for `method`, in order. Always ends with classical.
    fn chain(&self, method: EnhanceMethod) -> Vec<&dyn EnhanceStrategy> {
        let learned: Vec<&Option<Arc<dyn EnhanceStrategy>>> = match method {
            EnhanceMethod::Auto => vec![&self.primary, &self.secondary],
            EnhanceMethod::Primary => vec![&self.primary],
            EnhanceMethod::Secondary => vec![&self.secondary],
            EnhanceMethod::Basic => vec![],
        };

        let mut chain: Vec<&dyn EnhanceStrategy> =
            learned.into_iter().flatten().map(|s| s.as_ref()).collect();
        chain.push(&self.classical);
        chain
    }

    /// Enhance `image`, blending the result by `strength`.
    ///
    /// Returns the image and whether a learned strategy changed it. A
    /// strength of zero returns the input without running anything; a
    /// strength of one returns the raw strategy output.
    pub fn enhance(
        &self,
        image: &RgbImage,
        method: EnhanceMethod,
        strength: f32,
    ) -> (RgbImage, bool) {
        if strength.is_nan() || strength <= 0.0 {
            return (image.clone(), false);
        }

        for strategy in self.chain(method) {
            let kind = strategy.kind();
            match strategy.enhance(image) {
                Ok(out) if out.dimensions() != image.dimensions() => {
                    tracing::warn!(
                        strategy = ?kind,
                        expected = ?image.dimensions(),
                        got = ?out.dimensions(),
                        "enhancer changed image size; trying next strategy"
                    );
                }
                Ok(out) => {
                    let applied = kind.is_learned() && out != *image;
                    tracing::debug!(strategy = ?kind, applied, strength, "image enhanced");
                    return (blend(image, &out, strength), applied);
                }
                Err(e) => {
                    tracing::warn!(
                        strategy = ?kind,
                        error = %e,
                        "enhancement failed; trying next strategy"
                    );
                }
            }
        }

        // Unreachable in practice: the classical strategy cannot fail.
        (image.clone(), false)
    }
}

/// `(1 − s)·original + s·enhanced`, per channel.
pub fn blend(original: &RgbImage, enhanced: &RgbImage, strength: f32) -> RgbImage {
    let s = strength.clamp(0.0, 1.0);
    if s >= 1.0 {
        return enhanced.clone();
    }
    if s <= 0.0 {
        return original.clone();
    }

    let mut out = original.clone();
    for (o, e) in out.iter_mut().zip(enhanced.iter()) {
        *o = ((1.0 - s) * *o as f32 + s * *e as f32).round().clamp(0.0, 255.0) as u8;
    }
    out
}
