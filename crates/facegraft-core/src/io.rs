//! Image decoding, persistence and transient file cleanup.

use crate::error::PipelineError;
use image::{ImageFormat, ImageReader, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Decode any supported image format into an RGB buffer.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    let img = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?.decode()?;
    Ok(img.to_rgb8())
}

/// Load an image from disk, sniffing the format from its content.
pub fn load_image(path: &Path) -> Result<RgbImage, PipelineError> {
    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(img.to_rgb8())
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, PipelineError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Save `image`, choosing the format from the path's extension.
pub fn save_image(image: &RgbImage, path: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    image.save(path)?;
    Ok(())
}

/// Delete an uploaded input once it has been consumed. Never fails.
pub fn remove_transient(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "transient input removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove transient input")
        }
    }
}

/// Persists generated images.
pub trait OutputStore: Send + Sync {
    /// Store `image` and return where it can be found.
    fn put(&self, image: &RgbImage) -> Result<PathBuf, PipelineError>;
}

/// Writes PNGs with random names into one directory.
pub struct FsOutputStore {
    dir: PathBuf,
}

impl FsOutputStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl OutputStore for FsOutputStore {
    fn put(&self, image: &RgbImage) -> Result<PathBuf, PipelineError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.png", uuid::Uuid::new_v4()));
        image.save_with_format(&path, ImageFormat::Png)?;
        tracing::debug!(path = %path.display(), "output stored");
        Ok(path)
    }
}
