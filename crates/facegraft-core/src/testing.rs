//! Test doubles for the pipeline's pluggable seams.
//!
//! "Faces" in test images are solid squares of [`SKIN`]; [`FakeLocator`]
//! finds them by color, so tests can reason about exact face regions.

use crate::enhancer::{EnhanceStrategy, StrategyKind};
use crate::error::PipelineError;
use crate::locator::{check_image, FaceLocate, DETECTOR_FILE};
use crate::registry::{ModelActivator, ModelRegistry};
use crate::swapper::FaceSwap;
use crate::types::{Embedding, FaceBox, FaceDescriptor};
use facegraft_models::{
    Catalog, FetchError, Fetcher, Layout, ModelCache, ModelKind, Provisioner, Source,
};
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SKIN: Rgb<u8> = Rgb([220, 180, 150]);
pub const BACKDROP: Rgb<u8> = Rgb([30, 40, 50]);
pub const SWAPPED: Rgb<u8> = Rgb([90, 60, 200]);
pub const FACE_SIZE: u32 = 48;

/// A `w`×`h` image with one face square at (`x`, `y`).
pub fn portrait(w: u32, h: u32, x: f32, y: f32) -> RgbImage {
    let mut img = RgbImage::from_pixel(w, h, BACKDROP);
    let (x0, y0) = (x as u32, y as u32);
    for py in y0..(y0 + FACE_SIZE).min(h) {
        for px in x0..(x0 + FACE_SIZE).min(w) {
            img.put_pixel(px, py, SKIN);
        }
    }
    img
}

pub fn encode_png(img: &RgbImage) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// Locates the bounding box of all [`SKIN`] pixels as a single face.
pub struct FakeLocator;

impl FaceLocate for FakeLocator {
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceDescriptor>, PipelineError> {
        check_image(image)?;

        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, pixel) in image.enumerate_pixels() {
            if *pixel == SKIN {
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x1, y1, x2, y2)) => (x1.min(x), y1.min(y), x2.max(x), y2.max(y)),
                });
            }
        }

        Ok(bounds
            .map(|(x1, y1, x2, y2)| {
                let bbox = FaceBox {
                    x1: x1 as f32,
                    y1: y1 as f32,
                    x2: x2 as f32,
                    y2: y2 as f32,
                };
                let (w, h) = (bbox.width(), bbox.height());
                let at = |fx: f32, fy: f32| (bbox.x1 + fx * w, bbox.y1 + fy * h);
                FaceDescriptor {
                    bbox,
                    landmarks: [
                        at(0.3, 0.4),
                        at(0.7, 0.4),
                        at(0.5, 0.6),
                        at(0.35, 0.8),
                        at(0.65, 0.8),
                    ],
                    embedding: Embedding::normalized(vec![1.0, 2.0, 2.0]),
                    confidence: 0.9,
                }
            })
            .into_iter()
            .collect())
    }
}

/// Paints the target face box with [`SWAPPED`].
pub struct FakeSwapper;

impl FaceSwap for FakeSwapper {
    fn swap(
        &self,
        target: &RgbImage,
        target_face: &FaceDescriptor,
        _source_face: &FaceDescriptor,
        paste_back: bool,
    ) -> Result<RgbImage, PipelineError> {
        check_image(target)?;
        if !paste_back {
            return Ok(RgbImage::from_pixel(128, 128, SWAPPED));
        }
        let mut out = target.clone();
        let (x1, y1, x2, y2) = target_face.bbox.clamped(target.width(), target.height());
        for y in y1..=y2 {
            for x in x1..=x2 {
                out.put_pixel(x, y, SWAPPED);
            }
        }
        Ok(out)
    }
}

enum Behavior {
    Changing,
    Failing,
    Unchanged,
}

/// Scripted enhancement strategy.
pub struct FakeStrategy {
    kind: StrategyKind,
    behavior: Behavior,
}

impl FakeStrategy {
    /// Inverts every pixel.
    pub fn changing(kind: StrategyKind) -> Arc<dyn EnhanceStrategy> {
        Arc::new(Self { kind, behavior: Behavior::Changing })
    }

    pub fn failing(kind: StrategyKind) -> Arc<dyn EnhanceStrategy> {
        Arc::new(Self { kind, behavior: Behavior::Failing })
    }

    pub fn unchanged(kind: StrategyKind) -> Arc<dyn EnhanceStrategy> {
        Arc::new(Self { kind, behavior: Behavior::Unchanged })
    }
}

impl EnhanceStrategy for FakeStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn enhance(&self, image: &RgbImage) -> Result<RgbImage, PipelineError> {
        match self.behavior {
            Behavior::Changing => {
                let mut out = image.clone();
                out.iter_mut().for_each(|c| *c = 255 - *c);
                Ok(out)
            }
            Behavior::Failing => Err(PipelineError::inference("scripted failure")),
            Behavior::Unchanged => Ok(image.clone()),
        }
    }
}

/// Serves canned bodies per URL; unknown URLs fail with 404.
#[derive(Default)]
pub struct FakeFetcher {
    bodies: HashMap<String, Vec<u8>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn with(mut self, url: &str, body: &[u8]) -> Self {
        self.bodies.insert(url.to_string(), body.to_vec());
        self
    }
}

impl Fetcher for FakeFetcher {
    fn fetch(&self, source: &Source, dest: &mut dyn Write) -> Result<u64, FetchError> {
        self.calls.lock().unwrap().push(source.url.clone());
        let body = self.bodies.get(&source.url).ok_or(FetchError::Status(404))?;
        dest.write_all(body)?;
        Ok(body.len() as u64)
    }
}

/// Accepts artifacts whose content starts with `ONNX` and hands out fakes.
#[derive(Default)]
pub struct FakeActivator {
    pub activations: AtomicUsize,
}

impl FakeActivator {
    fn check(&self, path: &Path) -> Result<(), String> {
        let file = if path.is_dir() { path.join(DETECTOR_FILE) } else { path.to_path_buf() };
        let bytes = std::fs::read(&file).map_err(|e| format!("{}: {e}", file.display()))?;
        if !bytes.starts_with(b"ONNX") {
            return Err(format!("{}: not a model", file.display()));
        }
        self.activations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ModelActivator for FakeActivator {
    fn detection(&self, bundle_dir: &Path) -> Result<Arc<dyn FaceLocate>, String> {
        self.check(bundle_dir)?;
        Ok(Arc::new(FakeLocator))
    }

    fn swap(&self, model_path: &Path) -> Result<Arc<dyn FaceSwap>, String> {
        self.check(model_path)?;
        Ok(Arc::new(FakeSwapper))
    }

    fn restoration(
        &self,
        kind: StrategyKind,
        model_path: &Path,
        _locator: Arc<dyn FaceLocate>,
    ) -> Result<Arc<dyn EnhanceStrategy>, String> {
        self.check(model_path)?;
        Ok(FakeStrategy::changing(kind))
    }
}

/// Built-in catalog with every download candidate removed.
pub fn offline_catalog() -> Catalog {
    let mut catalog = Catalog::default();
    for kind in ModelKind::ALL {
        catalog.set_candidates(kind, vec![]);
    }
    catalog
}

/// Place activatable artifacts for `kinds` in the cache at `dir`.
pub fn seed_models(dir: &Path, kinds: &[ModelKind]) {
    let catalog = Catalog::default();
    for kind in kinds {
        let spec = catalog.spec(*kind);
        let path = dir.join(&spec.name);
        match &spec.layout {
            Layout::SingleFile => std::fs::write(&path, b"ONNX model").unwrap(),
            Layout::Bundle { required } => {
                std::fs::create_dir_all(&path).unwrap();
                for member in required {
                    std::fs::write(path.join(member), b"ONNX member").unwrap();
                }
            }
        }
    }
}

/// Offline registry over fakes, with `kinds` already cached in `dir`.
pub fn fake_registry(dir: &Path, kinds: &[ModelKind]) -> Arc<ModelRegistry> {
    seed_models(dir, kinds);
    let provisioner = Provisioner::new(ModelCache::new(dir), Arc::new(FakeFetcher::default()));
    Arc::new(ModelRegistry::new(
        offline_catalog(),
        provisioner,
        Arc::new(FakeActivator::default()),
    ))
}

/// Write `images` as PNG files under `dir`, returning their paths.
pub fn write_pngs(dir: &Path, images: &[(&str, RgbImage)]) -> Vec<PathBuf> {
    images
        .iter()
        .map(|(name, img)| {
            let path = dir.join(name);
            std::fs::write(&path, encode_png(img)).unwrap();
            path
        })
        .collect()
}
