use crate::error::PipelineError;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

/// Axis-aligned face box in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }

    /// Integer pixel bounds clamped to a `width` × `height` image.
    pub fn clamped(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let clamp = |v: f32, max: u32| v.round().clamp(0.0, max.saturating_sub(1) as f32) as u32;
        (
            clamp(self.x1, width),
            clamp(self.y1, height),
            clamp(self.x2, width),
            clamp(self.y2, height),
        )
    }
}

/// Identity embedding vector (512-dimensional, L2-normalized, for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// L2-normalize `raw`; a zero vector is kept as-is.
    pub fn normalized(raw: Vec<f32>) -> Self {
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };
        Self { values }
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// One detected face. Produced once by the face locator and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDescriptor {
    pub bbox: FaceBox,
    pub landmarks: Landmarks,
    pub embedding: Embedding,
    pub confidence: f32,
}

/// Which enhancement strategy chain to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhanceMethod {
    /// Primary model, then secondary, then classical.
    #[default]
    Auto,
    #[serde(alias = "gfpgan")]
    Primary,
    #[serde(alias = "codeformer")]
    Secondary,
    /// Classical enhancement only.
    Basic,
}

impl FromStr for EnhanceMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "primary" | "gfpgan" => Ok(Self::Primary),
            "secondary" | "codeformer" => Ok(Self::Secondary),
            "basic" => Ok(Self::Basic),
            other => Err(PipelineError::input(format!("unknown enhance method {other:?}"))),
        }
    }
}

impl fmt::Display for EnhanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Basic => "basic",
        })
    }
}

/// Per-call transform options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformOptions {
    pub enhance: bool,
    pub method: EnhanceMethod,
    /// Blend weight of the enhanced image, in [0, 1].
    pub strength: f32,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            enhance: false,
            method: EnhanceMethod::Auto,
            strength: 1.0,
        }
    }
}

impl TransformOptions {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(PipelineError::input(format!(
                "strength must be within [0, 1], got {}",
                self.strength
            )));
        }
        Ok(())
    }
}

/// A single source/target transform request.
#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub source: RgbImage,
    pub target: RgbImage,
    pub options: TransformOptions,
    /// Reference of the template the target came from, echoed in the result.
    pub template: Option<String>,
}

impl SwapRequest {
    pub fn new(
        source: RgbImage,
        target: RgbImage,
        options: TransformOptions,
    ) -> Result<Self, PipelineError> {
        options.validate()?;
        Ok(Self {
            source,
            target,
            options,
            template: None,
        })
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }
}

/// How the result image was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderPath {
    Swapped,
    Demo,
}

/// Outcome of one transform.
#[derive(Debug, Clone)]
pub struct SwapResult {
    pub image: Option<RgbImage>,
    pub success: bool,
    /// True only when a learned restoration ran and changed the image.
    pub enhanced: bool,
    pub template: Option<String>,
    pub error: Option<String>,
    pub path: Option<RenderPath>,
}

impl SwapResult {
    pub fn ok(image: RgbImage, enhanced: bool, path: RenderPath, template: Option<String>) -> Self {
        Self {
            image: Some(image),
            success: true,
            enhanced,
            template,
            error: None,
            path: Some(path),
        }
    }

    pub fn failed(error: &PipelineError, template: Option<String>) -> Self {
        Self {
            image: None,
            success: false,
            enhanced: false,
            template,
            error: Some(error.to_string()),
            path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> FaceBox {
        FaceBox { x1: x, y1: y, x2: x + w, y2: y + h }
    }

    #[test]
    fn test_iou_identical() {
        let a = bbox(0.0, 0.0, 100.0, 100.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(20.0, 20.0, 10.0, 10.0);
        assert!(a.iou(&b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_clamped_bounds() {
        let b = FaceBox { x1: -5.0, y1: 10.4, x2: 120.0, y2: 49.6 };
        assert_eq!(b.clamped(100, 50), (0, 10, 99, 49));
    }

    #[test]
    fn test_embedding_normalized() {
        let e = Embedding::normalized(vec![3.0, 4.0]);
        assert!((e.values[0] - 0.6).abs() < 1e-6);
        assert!((e.values[1] - 0.8).abs() < 1e-6);
        assert_eq!(Embedding::normalized(vec![0.0, 0.0]).values, vec![0.0, 0.0]);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = Embedding { values: vec![1.0, 0.0] };
        let b = Embedding { values: vec![0.0, 1.0] };
        let c = Embedding { values: vec![-1.0, 0.0] };
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
        assert!(a.similarity(&b).abs() < 1e-6);
        assert!((a.similarity(&c) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_enhance_method_parse() {
        assert_eq!("AUTO".parse::<EnhanceMethod>().unwrap(), EnhanceMethod::Auto);
        assert_eq!("gfpgan".parse::<EnhanceMethod>().unwrap(), EnhanceMethod::Primary);
        assert_eq!("codeformer".parse::<EnhanceMethod>().unwrap(), EnhanceMethod::Secondary);
        assert_eq!("basic".parse::<EnhanceMethod>().unwrap(), EnhanceMethod::Basic);
        assert!("sharpen".parse::<EnhanceMethod>().is_err());
    }

    #[test]
    fn test_options_json_defaults() {
        let opts: TransformOptions =
            serde_json::from_str(r#"{"enhance": true, "method": "basic"}"#).unwrap();
        assert!(opts.enhance);
        assert_eq!(opts.method, EnhanceMethod::Basic);
        assert_eq!(opts.strength, 1.0);
        let opts: TransformOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, TransformOptions::default());
    }

    #[test]
    fn test_method_names_agree_between_parsers() {
        for name in ["auto", "primary", "gfpgan", "secondary", "codeformer", "basic"] {
            let from_json: EnhanceMethod = serde_json::from_str(&format!("\"{name}\"")).unwrap();
            assert_eq!(from_json, name.parse::<EnhanceMethod>().unwrap(), "{name}");
        }
    }

    #[test]
    fn test_swap_request_rejects_bad_strength() {
        let img = RgbImage::new(4, 4);
        for strength in [-0.1, 1.5, f32::NAN] {
            let options = TransformOptions { enhance: true, strength, ..Default::default() };
            let err = SwapRequest::new(img.clone(), img.clone(), options).unwrap_err();
            assert!(matches!(err, PipelineError::Input(_)));
        }
        let options = TransformOptions { enhance: true, strength: 0.0, ..Default::default() };
        assert!(SwapRequest::new(img.clone(), img, options).is_ok());
    }
}
