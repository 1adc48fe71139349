//! inswapper face transplant via ONNX Runtime.
//!
//! The target face is aligned to a canonical 128×128 crop, regenerated with
//! the source identity, and warped back into the frame with a feathered seam.

use crate::alignment::{self, Similarity};
use crate::error::PipelineError;
use crate::identity_map;
use crate::locator::check_image;
use crate::types::FaceDescriptor;
use image::{Rgb, RgbImage};
use ndarray::{Array2, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use std::path::Path;

const INSWAPPER_INPUT_SIZE: usize = 128;
const INSWAPPER_STD: f32 = 255.0;
const INSWAPPER_TARGET_INPUT: &str = "target";
const INSWAPPER_SOURCE_INPUT: &str = "source";
/// Seam feather width as a fraction of the crop size.
const PASTE_FEATHER_RATIO: f32 = 0.1;

/// Pluggable face transplant.
pub trait FaceSwap: Send + Sync {
    /// Replace `target_face` in `target` with the identity of `source_face`.
    ///
    /// With `paste_back` the result has `target`'s dimensions; without it the
    /// regenerated aligned crop is returned.
    fn swap(
        &self,
        target: &RgbImage,
        target_face: &FaceDescriptor,
        source_face: &FaceDescriptor,
        paste_back: bool,
    ) -> Result<RgbImage, PipelineError>;
}

/// inswapper_128 transplanter.
pub struct OnnxFaceSwapper {
    session: Mutex<Session>,
    emap: Array2<f32>,
}

impl OnnxFaceSwapper {
    /// Load the swap model and its identity projection.
    pub fn load(model_path: &Path) -> Result<Self, PipelineError> {
        let session = Session::builder()?
            .with_intra_threads(4)?
            .commit_from_file(model_path)?;

        let inputs: Vec<String> = session.inputs().iter().map(|i| i.name().to_string()).collect();
        tracing::info!(
            path = %model_path.display(),
            inputs = ?inputs,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded inswapper model"
        );

        for required in [INSWAPPER_TARGET_INPUT, INSWAPPER_SOURCE_INPUT] {
            if !inputs.iter().any(|n| n == required) {
                return Err(PipelineError::inference(format!(
                    "swap model has no {required:?} input (inputs: {inputs:?})"
                )));
            }
        }

        let emap = identity_map::load(model_path)?;

        Ok(Self {
            session: Mutex::new(session),
            emap,
        })
    }

    fn regenerate(
        &self,
        aligned: &RgbImage,
        source_face: &FaceDescriptor,
    ) -> Result<RgbImage, PipelineError> {
        let blob = preprocess(aligned);
        let latent = identity_map::project(&source_face.embedding.values, &self.emap);
        let latent = Array2::from_shape_vec((1, latent.len()), latent)
            .map_err(|e| PipelineError::inference(format!("latent shape: {e}")))?;

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![
            INSWAPPER_TARGET_INPUT => TensorRef::from_array_view(blob.view())?,
            INSWAPPER_SOURCE_INPUT => TensorRef::from_array_view(latent.view())?
        ])?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::inference(format!("swap output: {e}")))?;

        postprocess(data, INSWAPPER_INPUT_SIZE)
    }
}

impl FaceSwap for OnnxFaceSwapper {
    fn swap(
        &self,
        target: &RgbImage,
        target_face: &FaceDescriptor,
        source_face: &FaceDescriptor,
        paste_back: bool,
    ) -> Result<RgbImage, PipelineError> {
        check_image(target)?;

        let size = INSWAPPER_INPUT_SIZE as u32;
        let (aligned, transform) = alignment::align_face(
            target,
            &target_face.landmarks,
            &alignment::arcface_reference(size),
            size,
        );

        let generated = self.regenerate(&aligned, source_face)?;
        if !paste_back {
            return Ok(generated);
        }

        Ok(composite(target, &generated, &transform))
    }
}

/// Paste a regenerated crop into a copy of `target`.
pub fn composite(target: &RgbImage, crop: &RgbImage, transform: &Similarity) -> RgbImage {
    let mut out = target.clone();
    let feather = crop.width().min(crop.height()) as f32 * PASTE_FEATHER_RATIO;
    alignment::paste_back(&mut out, crop, transform, feather);
    out
}

/// RGB crop → NCHW tensor in [0, 1].
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let (w, h) = (aligned.width() as usize, aligned.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / INSWAPPER_STD;
        }
    }
    tensor
}

/// NCHW output in [0, 1] → RGB crop.
fn postprocess(data: &[f32], size: usize) -> Result<RgbImage, PipelineError> {
    let plane = size * size;
    if data.len() != 3 * plane {
        return Err(PipelineError::inference(format!(
            "expected {} output values, got {}",
            3 * plane,
            data.len()
        )));
    }
    Ok(RgbImage::from_fn(size as u32, size as u32, |x, y| {
        let i = y as usize * size + x as usize;
        Rgb(std::array::from_fn(|c| {
            (data[c * plane + i] * INSWAPPER_STD).round().clamp(0.0, 255.0) as u8
        }))
    }))
}
