//! Learned face restoration (GFPGAN, CodeFormer) via ONNX Runtime.
//!
//! Every detected face is aligned to the 512×512 FFHQ template, restored,
//! and pasted back over the frame with a feathered border.

use crate::alignment::{self, FFHQ_REFERENCE_512};
use crate::enhancer::{EnhanceStrategy, StrategyKind};
use crate::error::PipelineError;
use crate::locator::{check_image, FaceLocate};
use image::{Rgb, RgbImage};
use ndarray::{Array1, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

const RESTORE_INPUT_SIZE: usize = 512;
/// CodeFormer fidelity weight: 0 favours quality, 1 favours the input identity.
const CODEFORMER_FIDELITY: f64 = 0.7;
const PASTE_FEATHER_RATIO: f32 = 0.06;

/// Restoration model bound to a face locator.
pub struct OnnxFaceRestorer {
    kind: StrategyKind,
    session: Mutex<Session>,
    image_input: String,
    /// Name of the fidelity input, for models that take one (CodeFormer).
    fidelity_input: Option<String>,
    locator: Arc<dyn FaceLocate>,
}

impl OnnxFaceRestorer {
    pub fn load(
        kind: StrategyKind,
        model_path: &Path,
        locator: Arc<dyn FaceLocate>,
    ) -> Result<Self, PipelineError> {
        let session = Session::builder()?
            .with_intra_threads(4)?
            .commit_from_file(model_path)?;

        let inputs: Vec<String> = session.inputs().iter().map(|i| i.name().to_string()).collect();
        tracing::info!(
            strategy = ?kind,
            path = %model_path.display(),
            inputs = ?inputs,
            "loaded restoration model"
        );

        let mut names = inputs.into_iter();
        let image_input = names
            .next()
            .ok_or_else(|| PipelineError::inference("restoration model has no inputs"))?;
        let fidelity_input = names.next();

        Ok(Self {
            kind,
            session: Mutex::new(session),
            image_input,
            fidelity_input,
            locator,
        })
    }

    fn restore_crop(&self, crop: &RgbImage) -> Result<RgbImage, PipelineError> {
        let blob = preprocess(crop);
        let weight = Array1::from_elem(1, CODEFORMER_FIDELITY);
        let mut session = self.session.lock();

        let outputs = match &self.fidelity_input {
            Some(fidelity) => session.run(ort::inputs![
                self.image_input.as_str() => TensorRef::from_array_view(blob.view())?,
                fidelity.as_str() => TensorRef::from_array_view(weight.view())?
            ])?,
            None => session.run(ort::inputs![
                self.image_input.as_str() => TensorRef::from_array_view(blob.view())?
            ])?,
        };

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::inference(format!("restoration output: {e}")))?;

        postprocess(data, RESTORE_INPUT_SIZE)
    }
}

impl EnhanceStrategy for OnnxFaceRestorer {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn enhance(&self, image: &RgbImage) -> Result<RgbImage, PipelineError> {
        check_image(image)?;
        let faces = self.locator.detect(image)?;

        let size = RESTORE_INPUT_SIZE as u32;
        let feather = size as f32 * PASTE_FEATHER_RATIO;
        let mut out = image.clone();
        for face in &faces {
            let (crop, transform) =
                alignment::align_face(image, &face.landmarks, &FFHQ_REFERENCE_512, size);
            let restored = self.restore_crop(&crop)?;
            alignment::paste_back(&mut out, &restored, &transform, feather);
        }

        tracing::debug!(strategy = ?self.kind, faces = faces.len(), "faces restored");
        Ok(out)
    }
}

/// RGB crop → NCHW tensor in [-1, 1].
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let (w, h) = (crop.width() as usize, crop.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 / 255.0 - 0.5) / 0.5;
        }
    }
    tensor
}

/// NCHW output in [-1, 1] → RGB crop.
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
            ((data[c * plane + i].clamp(-1.0, 1.0) + 1.0) * 127.5).round() as u8
        }))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_symmetric_range() {
        let crop = RgbImage::from_pixel(4, 4, Rgb([255, 0, 51]));
        let t = preprocess(&crop);
        assert_eq!(t.shape(), &[1, 3, 4, 4]);
        assert!((t[[0, 0, 1, 1]] - 1.0).abs() < 1e-6);
        assert!((t[[0, 1, 1, 1]] + 1.0).abs() < 1e-6);
        assert!((t[[0, 2, 1, 1]] + 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_postprocess_maps_and_clamps() {
        let size = 2;
        let mut data = vec![1.0f32; 4];
        data.extend([-1.0f32; 4]);
        data.extend([3.0f32; 4]);
        let img = postprocess(&data, size).unwrap();
        assert_eq!(img.get_pixel(0, 1).0, [255, 0, 255]);
    }

    #[test]
    fn test_postprocess_rejects_wrong_length() {
        assert!(postprocess(&[0.0; 7], 2).is_err());
    }
}
