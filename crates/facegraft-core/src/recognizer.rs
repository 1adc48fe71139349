//! ArcFace identity encoder via ONNX Runtime.
//!
//! Extracts 512-dimensional identity embeddings from aligned face crops,
//! using the w600k_r50 ArcFace model. The swap model is conditioned on these.

use crate::alignment::{self, ARCFACE_REFERENCE_112};
use crate::error::PipelineError;
use crate::types::{Embedding, Landmarks};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

// ArcFace preprocessing differs from SCRFD.
const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric: (x - 127.5) / 127.5
pub const ARCFACE_EMBEDDING_DIM: usize = 512;

/// ArcFace-based identity encoder.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, PipelineError> {
        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Extract the identity embedding of the face at `landmarks` in `frame`.
    pub fn extract(
        &mut self,
        frame: &RgbImage,
        landmarks: &Landmarks,
    ) -> Result<Embedding, PipelineError> {
        let (aligned, _) = alignment::align_face(
            frame,
            landmarks,
            &ARCFACE_REFERENCE_112,
            ARCFACE_INPUT_SIZE as u32,
        );
        let input = Self::preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::inference(format!("embedding extraction: {e}")))?;

        if raw_data.len() != ARCFACE_EMBEDDING_DIM {
            return Err(PipelineError::inference(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw_data.len()
            )));
        }

        Ok(Embedding::normalized(raw_data.to_vec()))
    }

    /// Preprocess a 112×112 RGB aligned face crop into a NCHW float tensor.
    fn preprocess(aligned_face: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in aligned_face.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            if x >= size || y >= size {
                continue;
            }
            for c in 0..3 {
                tensor[[0, c, y, x]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }

        tensor
    }
}
