//! Face location: detection plus identity extraction.

use crate::detector::FaceDetector;
use crate::error::PipelineError;
use crate::recognizer::FaceRecognizer;
use crate::types::FaceDescriptor;
use image::RgbImage;
use parking_lot::Mutex;
use std::path::Path;

/// Detection model file inside the detection bundle.
pub const DETECTOR_FILE: &str = "det_10g.onnx";
/// Identity model file inside the detection bundle.
pub const RECOGNIZER_FILE: &str = "w600k_r50.onnx";

/// Pluggable face locator.
pub trait FaceLocate: Send + Sync {
    /// Faces in `image`, highest confidence first. No face is `Ok(vec![])`.
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceDescriptor>, PipelineError>;
}

/// Reject buffers no model can consume.
pub fn check_image(image: &RgbImage) -> Result<(), PipelineError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::input(format!(
            "image has zero dimensions ({}x{})",
            image.width(),
            image.height()
        )));
    }
    Ok(())
}

/// SCRFD + ArcFace locator loaded from the detection bundle.
pub struct OnnxFaceLocator {
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
}

impl OnnxFaceLocator {
    /// Load both models from a bundle directory.
    pub fn load(bundle_dir: &Path) -> Result<Self, PipelineError> {
        let detector = FaceDetector::load(&bundle_dir.join(DETECTOR_FILE))?;
        let recognizer = FaceRecognizer::load(&bundle_dir.join(RECOGNIZER_FILE))?;
        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
        })
    }
}

impl FaceLocate for OnnxFaceLocator {
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceDescriptor>, PipelineError> {
        check_image(image)?;

        let detections = self.detector.lock().detect(image)?;
        tracing::debug!(faces = detections.len(), "faces detected");

        let mut recognizer = self.recognizer.lock();
        detections
            .into_iter()
            .map(|d| {
                let embedding = recognizer.extract(image, &d.landmarks)?;
                Ok(FaceDescriptor {
                    bbox: d.bbox,
                    landmarks: d.landmarks,
                    embedding,
                    confidence: d.score,
                })
            })
            .collect()
    }
}

/// First (highest confidence) face, or `Input` when there is none.
pub fn primary_face(
    locator: &dyn FaceLocate,
    image: &RgbImage,
    role: &str,
) -> Result<FaceDescriptor, PipelineError> {
    locator
        .detect(image)?
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::input(format!("no face detected in {role} image")))
}
