//! Placeholder output used while the swap model is unavailable.
//!
//! Source and target are laid side by side under a banner, each detected
//! face outlined, so callers still receive a well-formed image.

use crate::types::{FaceBox, FaceDescriptor};
use image::{Rgb, RgbImage};

pub const DEMO_BANNER: &str = "DEMO MODE - SWAP MODEL UNAVAILABLE";

const BACKGROUND: Rgb<u8> = Rgb([24, 24, 24]);
const BANNER_FILL: Rgb<u8> = Rgb([160, 24, 24]);
const BANNER_TEXT: Rgb<u8> = Rgb([255, 255, 255]);
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 3;

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const BANNER_PADDING: u32 = 6;

/// Side-by-side demo composite of `source` (left) and `target` (right).
pub fn render_demo(
    source: &RgbImage,
    target: &RgbImage,
    source_face: &FaceDescriptor,
    target_face: &FaceDescriptor,
) -> RgbImage {
    let width = (source.width() + target.width()).max(1);
    let scale = text_scale(width);
    let banner_h = GLYPH_H * scale + 2 * BANNER_PADDING;
    let height = source.height().max(target.height()) + banner_h;

    let mut canvas = RgbImage::from_pixel(width, height, BACKGROUND);
    fill_rect(&mut canvas, 0, 0, width, banner_h, BANNER_FILL);
    let text_w = text_width(DEMO_BANNER, scale);
    draw_text(
        &mut canvas,
        DEMO_BANNER,
        width.saturating_sub(text_w) / 2,
        BANNER_PADDING,
        scale,
        BANNER_TEXT,
    );

    blit(&mut canvas, source, 0, banner_h);
    blit(&mut canvas, target, source.width(), banner_h);

    draw_box(&mut canvas, &source_face.bbox, 0, banner_h, source.dimensions());
    draw_box(&mut canvas, &target_face.bbox, source.width(), banner_h, target.dimensions());

    tracing::debug!(width, height, "rendered demo composite");
    canvas
}

/// Largest integer text scale (up to 3) whose banner fits in `width`.
fn text_scale(width: u32) -> u32 {
    (1..=3)
        .rev()
        .find(|&s| text_width(DEMO_BANNER, s) + 2 * BANNER_PADDING <= width)
        .unwrap_or(1)
}

fn text_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    (n * (GLYPH_W + 1)).saturating_sub(1) * scale
}

fn blit(canvas: &mut RgbImage, img: &RgbImage, ox: u32, oy: u32) {
    for (x, y, pixel) in img.enumerate_pixels() {
        if ox + x < canvas.width() && oy + y < canvas.height() {
            canvas.put_pixel(ox + x, oy + y, *pixel);
        }
    }
}

fn fill_rect(canvas: &mut RgbImage, x0: u32, y0: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x1 = (x0 + w).min(canvas.width());
    let y1 = (y0 + h).min(canvas.height());
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x, y, color);
        }
    }
}

/// Outline `bbox` (in the coordinates of an image of `bounds` pasted at `ox`, `oy`).
fn draw_box(canvas: &mut RgbImage, bbox: &FaceBox, ox: u32, oy: u32, bounds: (u32, u32)) {
    if bounds.0 == 0 || bounds.1 == 0 {
        return;
    }
    let (x1, y1, x2, y2) = bbox.clamped(bounds.0, bounds.1);
    let w = x2.saturating_sub(x1) + 1;
    let h = y2.saturating_sub(y1) + 1;
    let t = BOX_THICKNESS.min(w).min(h);

    let (x, y) = (ox + x1, oy + y1);
    fill_rect(canvas, x, y, w, t, BOX_COLOR);
    fill_rect(canvas, x, y + h - t, w, t, BOX_COLOR);
    fill_rect(canvas, x, y, t, h, BOX_COLOR);
    fill_rect(canvas, x + w - t, y, t, h, BOX_COLOR);
}

fn draw_text(canvas: &mut RgbImage, text: &str, x0: u32, y0: u32, scale: u32, color: Rgb<u8>) {
    let mut x = x0;
    for ch in text.chars() {
        let rows = glyph(ch);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) != 0 {
                    let (px, py) = (x + col * scale, y0 + row as u32 * scale);
                    fill_rect(canvas, px, py, scale, scale, color);
                }
            }
        }
        x += (GLYPH_W + 1) * scale;
    }
}

/// 5×7 bitmap rows, leftmost pixel in bit 4. Unknown characters render blank.
fn glyph(ch: char) -> [u8; 7] {
    match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        _ => [0; 7],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Embedding;

    fn face(x1: f32, y1: f32, x2: f32, y2: f32) -> FaceDescriptor {
        FaceDescriptor {
            bbox: FaceBox { x1, y1, x2, y2 },
            landmarks: [(0.0, 0.0); 5],
            embedding: Embedding { values: vec![] },
            confidence: 0.9,
        }
    }

    #[test]
    fn test_layout_dimensions() {
        let source = RgbImage::from_pixel(200, 150, Rgb([10, 20, 30]));
        let target = RgbImage::from_pixel(300, 220, Rgb([40, 50, 60]));
        let source_face = face(10.0, 10.0, 60.0, 70.0);
        let target_face = face(20.0, 30.0, 90.0, 100.0);
        let out = render_demo(&source, &target, &source_face, &target_face);

        assert_eq!(out.width(), 500);
        assert!(out.height() > 220);
        let banner_h = out.height() - 220;
        // Images sit under the banner, side by side.
        assert_eq!(out.get_pixel(150, banner_h + 120).0, [10, 20, 30]);
        assert_eq!(out.get_pixel(450, banner_h + 200).0, [40, 50, 60]);
        // Source is shorter than the canvas: the gap is background.
        assert_eq!(out.get_pixel(150, banner_h + 200), &BACKGROUND);
    }

    #[test]
    fn test_both_faces_boxed() {
        let source = RgbImage::from_pixel(200, 150, Rgb([10, 20, 30]));
        let target = RgbImage::from_pixel(300, 220, Rgb([40, 50, 60]));
        let source_face = face(10.0, 10.0, 60.0, 70.0);
        let target_face = face(20.0, 30.0, 90.0, 100.0);
        let out = render_demo(&source, &target, &source_face, &target_face);
        let banner_h = out.height() - 220;

        // Box corners on the outline, interior untouched.
        assert_eq!(out.get_pixel(10, banner_h + 10), &BOX_COLOR);
        assert_eq!(out.get_pixel(60, banner_h + 70), &BOX_COLOR);
        assert_eq!(out.get_pixel(35, banner_h + 40).0, [10, 20, 30]);

        assert_eq!(out.get_pixel(200 + 20, banner_h + 30), &BOX_COLOR);
        assert_eq!(out.get_pixel(200 + 90, banner_h + 100), &BOX_COLOR);
        assert_eq!(out.get_pixel(200 + 55, banner_h + 65).0, [40, 50, 60]);
    }

    #[test]
    fn test_banner_has_text() {
        let img = RgbImage::from_pixel(400, 300, Rgb([0, 0, 0]));
        let f = face(100.0, 100.0, 200.0, 200.0);
        let out = render_demo(&img, &img, &f, &f);
        let banner_h = out.height() - 300;
        let text_pixels = (0..out.width())
            .flat_map(|x| (0..banner_h).map(move |y| (x, y)))
            .filter(|&(x, y)| *out.get_pixel(x, y) == BANNER_TEXT)
            .count();
        assert!(text_pixels > 100);
    }

    #[test]
    fn test_every_banner_char_has_glyph() {
        for ch in DEMO_BANNER.chars().filter(|c| *c != ' ') {
            assert_ne!(glyph(ch), [0; 7], "missing glyph for {ch:?}");
        }
    }
}
