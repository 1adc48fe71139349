//! Classical (model-free) enhancement: CLAHE on luminance, then a 3×3 sharpen.
//!
//! Fully deterministic: identical input always yields identical bytes.

use image::{Rgb, RgbImage};

const CLAHE_TILES: u32 = 8;
const CLAHE_CLIP_LIMIT: f32 = 0.02;
/// 3×3 sharpening kernel (sums to 1).
const SHARPEN_KERNEL: [[i32; 3]; 3] = [[0, -1, 0], [-1, 5, -1], [0, -1, 0]];

/// Local contrast equalization followed by sharpening.
pub fn enhance(image: &RgbImage) -> RgbImage {
    sharpen(&equalize_luma(image))
}

/// Apply CLAHE to the luminance channel, shifting RGB by the luminance delta.
pub fn equalize_luma(image: &RgbImage) -> RgbImage {
    let (w, h) = image.dimensions();
    let luma: Vec<u8> = image.pixels().map(|p| luminance(p.0)).collect();
    let mut equalized = luma.clone();
    clahe_enhance(&mut equalized, w, h, CLAHE_TILES, CLAHE_CLIP_LIMIT);

    let mut out = image.clone();
    for ((pixel, &before), &after) in out.pixels_mut().zip(&luma).zip(&equalized) {
        let delta = after as i32 - before as i32;
        pixel.0 = pixel.0.map(|c| (c as i32 + delta).clamp(0, 255) as u8);
    }
    out
}

fn luminance([r, g, b]: [u8; 3]) -> u8 {
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).round().clamp(0.0, 255.0) as u8
}

/// Contrast-Limited Adaptive Histogram Equalization (CLAHE), in place.
///
/// Divides the image into a grid of tiles, computes a clipped histogram
/// per tile, builds CDFs, and uses bilinear interpolation between tile
/// CDFs for smooth output. Images smaller than the grid are left untouched.
pub fn clahe_enhance(gray: &mut [u8], width: u32, height: u32, tiles: u32, clip_limit: f32) {
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 || gray.len() < w * h {
        return;
    }

    let tx = tiles as usize;
    let ty = tiles as usize;
    let tile_w = w / tx;
    let tile_h = h / ty;
    if tile_w == 0 || tile_h == 0 {
        return;
    }
    let tile_pixels = tile_w * tile_h;

    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(tx * ty);

    for row in 0..ty {
        for col in 0..tx {
            let mut hist = [0u32; 256];
            let y0 = row * tile_h;
            let x0 = col * tile_w;

            for y in y0..y0 + tile_h {
                for x in x0..x0 + tile_w {
                    hist[gray[y * w + x] as usize] += 1;
                }
            }

            // Clip and redistribute the excess evenly.
            let clip = ((clip_limit * tile_pixels as f32) as u32).max(1);
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let redist = excess / 256;
            let leftover = (excess % 256) as usize;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += redist;
                if i < leftover {
                    *bin += 1;
                }
            }

            let mut cdf = [0f32; 256];
            cdf[0] = hist[0] as f32;
            for i in 1..256 {
                cdf[i] = cdf[i - 1] + hist[i] as f32;
            }
            let cdf_min = cdf.iter().find(|&&v| v > 0.0).copied().unwrap_or(0.0);
            let denom = (tile_pixels as f32) - cdf_min;
            if denom > 0.0 {
                for v in cdf.iter_mut() {
                    *v = ((*v - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
                }
            } else {
                // Flat tile: identity mapping.
                for (i, v) in cdf.iter_mut().enumerate() {
                    *v = i as f32;
                }
            }
            cdfs.push(cdf);
        }
    }

    for y in 0..h {
        for x in 0..w {
            let pixel = gray[y * w + x] as usize;

            let fy = ((y as f32 / tile_h as f32) - 0.5).clamp(0.0, (ty - 1) as f32);
            let fx = ((x as f32 / tile_w as f32) - 0.5).clamp(0.0, (tx - 1) as f32);

            let r0 = fy as usize;
            let c0 = fx as usize;
            let r1 = (r0 + 1).min(ty - 1);
            let c1 = (c0 + 1).min(tx - 1);

            let dy = fy - r0 as f32;
            let dx = fx - c0 as f32;

            let top = cdfs[r0 * tx + c0][pixel] * (1.0 - dx) + cdfs[r0 * tx + c1][pixel] * dx;
            let bot = cdfs[r1 * tx + c0][pixel] * (1.0 - dx) + cdfs[r1 * tx + c1][pixel] * dx;
            let val = top * (1.0 - dy) + bot * dy;

            gray[y * w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Convolve with [`SHARPEN_KERNEL`], replicating edge pixels.
pub fn sharpen(image: &RgbImage) -> RgbImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }

    RgbImage::from_fn(w, h, |x, y| {
        let mut acc = [0i32; 3];
        for (ky, row) in SHARPEN_KERNEL.iter().enumerate() {
            for (kx, &k) in row.iter().enumerate() {
                if k == 0 {
                    continue;
                }
                let sx = (x as i64 + kx as i64 - 1).clamp(0, w as i64 - 1) as u32;
                let sy = (y as i64 + ky as i64 - 1).clamp(0, h as i64 - 1) as u32;
                let p = image.get_pixel(sx, sy).0;
                for c in 0..3 {
                    acc[c] += k * p[c] as i32;
                }
            }
        }
        Rgb(acc.map(|v| v.clamp(0, 255) as u8))
    })
}
