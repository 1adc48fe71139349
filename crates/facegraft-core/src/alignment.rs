//! Face alignment via 4-DOF similarity transform.
//!
//! Aligns detected faces to a canonical crop using five reference landmarks
//! and least-squares estimation, and composites processed crops back into
//! the full frame through the inverse transform.

use crate::types::Landmarks;
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
pub const ARCFACE_REFERENCE_112: Landmarks = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// FFHQ reference landmarks for a 512×512 restoration crop.
pub const FFHQ_REFERENCE_512: Landmarks = [
    (192.98138, 239.94708),
    (318.90277, 240.19360),
    (256.63416, 314.01935),
    (201.26117, 371.41043),
    (313.08905, 371.15118),
];

/// ArcFace reference landmarks scaled to a `size`×`size` crop.
///
/// Sizes that are multiples of 112 scale uniformly; other sizes use the
/// 128-based layout with an 8px horizontal shift.
pub fn arcface_reference(size: u32) -> Landmarks {
    let (ratio, diff_x) = if size % 112 == 0 {
        (size as f32 / 112.0, 0.0)
    } else {
        let ratio = size as f32 / 128.0;
        (ratio, 8.0 * ratio)
    };
    ARCFACE_REFERENCE_112.map(|(x, y)| (x * ratio + diff_x, y * ratio))
}

/// Similarity transform mapping source points to destination points:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    pub const IDENTITY: Similarity = Similarity { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    /// Least-squares estimate from `src` landmarks to `dst` landmarks.
    pub fn estimate(src: &Landmarks, dst: &Landmarks) -> Self {
        // Build overdetermined system A * [a, b, tx, ty]^T = B
        // For each point pair (sx, sy) -> (dx, dy):
        //   sx * a - sy * b + tx = dx
        //   sy * a + sx * b + ty = dy
        let mut ata = [0.0f32; 16]; // 4x4, row-major
        let mut atb = [0.0f32; 4];

        for ((sx, sy), (dx, dy)) in src.iter().copied().zip(dst.iter().copied()) {
            let r1 = [sx, -sy, 1.0, 0.0];
            let r2 = [sy, sx, 0.0, 1.0];

            for j in 0..4 {
                for k in 0..4 {
                    ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
                }
                atb[j] += r1[j] * dx + r2[j] * dy;
            }
        }

        let [a, b, tx, ty] = solve_4x4(&ata, &atb);
        Self { a, b, tx, ty }
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse transform, or `None` for a degenerate (zero-scale) one.
    pub fn inverse(&self) -> Option<Similarity> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Similarity {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }

    /// Uniform scale factor of the transform.
    pub fn scale(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0]; // fallback: identity-ish
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// Bilinear RGB sample; out-of-bounds neighbours read as black.
fn sample_bilinear(img: &RgbImage, sx: f32, sy: f32) -> [f32; 3] {
    let (w, h) = (img.width() as i32, img.height() as i32);
    let x0 = sx.floor() as i32;
    let y0 = sy.floor() as i32;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let px = |x: i32, y: i32| -> [f32; 3] {
        if x >= 0 && x < w && y >= 0 && y < h {
            let p = img.get_pixel(x as u32, y as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr, bl, br) = (px(x0, y0), px(x0 + 1, y0), px(x0, y0 + 1), px(x0 + 1, y0 + 1));
    let mut out = [0.0f32; 3];
    for c in 0..3 {
        out[c] = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
    }
    out
}

fn to_pixel(v: [f32; 3]) -> Rgb<u8> {
    Rgb(v.map(|c| c.round().clamp(0.0, 255.0) as u8))
}

/// Warp `img` through `transform` (source → output) into an `out_w`×`out_h` image.
pub fn warp_affine(img: &RgbImage, transform: &Similarity, out_w: u32, out_h: u32) -> RgbImage {
    let Some(inv) = transform.inverse() else {
        return RgbImage::new(out_w, out_h);
    };

    RgbImage::from_fn(out_w, out_h, |ox, oy| {
        let (sx, sy) = inv.apply((ox as f32, oy as f32));
        to_pixel(sample_bilinear(img, sx, sy))
    })
}

/// Align a face to a `size`×`size` crop matching `reference`.
///
/// Returns the crop and the frame → crop transform needed for paste-back.
pub fn align_face(
    img: &RgbImage,
    landmarks: &Landmarks,
    reference: &Landmarks,
    size: u32,
) -> (RgbImage, Similarity) {
    let transform = Similarity::estimate(landmarks, reference);
    (warp_affine(img, &transform, size, size), transform)
}

/// Composite `crop` back into `frame` through the inverse of `transform`
/// (frame → crop), feathering the crop border over `feather` crop pixels.
pub fn paste_back(frame: &mut RgbImage, crop: &RgbImage, transform: &Similarity, feather: f32) {
    let Some(inv) = transform.inverse() else {
        return;
    };
    let (cw, ch) = (crop.width() as f32, crop.height() as f32);
    if cw < 1.0 || ch < 1.0 || frame.width() == 0 || frame.height() == 0 {
        return;
    }

    // Bounding rectangle of the crop's corners in frame space.
    let corners = [(0.0, 0.0), (cw - 1.0, 0.0), (0.0, ch - 1.0), (cw - 1.0, ch - 1.0)]
        .map(|p| inv.apply(p));
    let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let max_x = (corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max).ceil() as i64)
        .clamp(0, frame.width() as i64 - 1) as u32;
    let max_y = (corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max).ceil() as i64)
        .clamp(0, frame.height() as i64 - 1) as u32;

    let feather = feather.max(1.0);
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let (cx, cy) = transform.apply((x as f32, y as f32));
            let edge = cx.min(cy).min(cw - 1.0 - cx).min(ch - 1.0 - cy);
            if edge < 0.0 {
                continue;
            }
            let t = (edge / feather).min(1.0);
            let alpha = t * t * (3.0 - 2.0 * t);

            let src = sample_bilinear(crop, cx, cy);
            let dst = frame.get_pixel(x, y).0;
            let mut out = [0.0f32; 3];
            for c in 0..3 {
                out[c] = alpha * src[c] + (1.0 - alpha) * dst[c] as f32;
            }
            frame.put_pixel(x, y, to_pixel(out));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let pts = ARCFACE_REFERENCE_112;
        let m = Similarity::estimate(&pts, &pts);
        assert!((m.a - 1.0).abs() < 1e-4, "a = {}", m.a);
        assert!(m.b.abs() < 1e-4, "b = {}", m.b);
        assert!(m.tx.abs() < 1e-3, "tx = {}", m.tx);
        assert!(m.ty.abs() < 1e-3, "ty = {}", m.ty);
    }

    #[test]
    fn test_scaled_transform() {
        // Source landmarks at 2x scale → transform should have a ≈ 0.5
        let src = ARCFACE_REFERENCE_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let m = Similarity::estimate(&src, &ARCFACE_REFERENCE_112);
        assert!((m.a - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m.a);
        assert!((m.scale() - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = Similarity { a: 0.8, b: 0.3, tx: 12.0, ty: -7.0 };
        let inv = t.inverse().unwrap();
        let p = (41.0, 93.5);
        let back = inv.apply(t.apply(p));
        assert!((back.0 - p.0).abs() < 1e-3 && (back.1 - p.1).abs() < 1e-3, "{back:?}");
    }

    #[test]
    fn test_degenerate_inverse() {
        let t = Similarity { a: 0.0, b: 0.0, tx: 1.0, ty: 1.0 };
        assert!(t.inverse().is_none());
        assert_eq!(warp_affine(&RgbImage::new(4, 4), &t, 3, 2).dimensions(), (3, 2));
    }

    #[test]
    fn test_arcface_reference_128_shift() {
        let r = arcface_reference(128);
        assert!((r[0].0 - (38.2946 + 8.0)).abs() < 1e-4);
        assert!((r[0].1 - 51.6963).abs() < 1e-4);
        let r = arcface_reference(224);
        assert!((r[0].0 - 38.2946 * 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_align_face_output_size() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        let (aligned, _) = align_face(&frame, &ARCFACE_REFERENCE_112, &ARCFACE_REFERENCE_112, 112);
        assert_eq!(aligned.dimensions(), (112, 112));
        assert_eq!(aligned.get_pixel(56, 56).0, [128, 128, 128]);
    }

    #[test]
    fn test_landmark_roundtrip() {
        // A bright patch at the left eye lands near the reference left eye.
        let mut frame = RgbImage::new(200, 200);
        let src: Landmarks = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for dy in 0..5 {
            for dx in 0..5 {
                frame.put_pixel(78 + dx, 58 + dy, Rgb([255, 0, 0]));
            }
        }

        let (aligned, _) = align_face(&frame, &src, &ARCFACE_REFERENCE_112, 112);

        let ref_x = ARCFACE_REFERENCE_112[0].0.round() as u32;
        let ref_y = ARCFACE_REFERENCE_112[0].1.round() as u32;
        let mut max_red = 0u8;
        for y in ref_y - 1..=ref_y + 1 {
            for x in ref_x - 1..=ref_x + 1 {
                max_red = max_red.max(aligned.get_pixel(x, y)[0]);
            }
        }
        assert!(max_red > 100, "expected red patch near ({ref_x}, {ref_y}), max={max_red}");
    }

    #[test]
    fn test_paste_back_only_touches_face_region() {
        let mut frame = RgbImage::from_pixel(200, 200, Rgb([10, 10, 10]));
        let src: Landmarks = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        let (_, transform) = align_face(&frame, &src, &arcface_reference(128), 128);
        let crop = RgbImage::from_pixel(128, 128, Rgb([250, 250, 250]));

        paste_back(&mut frame, &crop, &transform, 8.0);

        // Nose is well inside the crop: fully replaced.
        assert_eq!(frame.get_pixel(100, 85).0, [250, 250, 250]);
        // Far corner is outside the crop: untouched.
        assert_eq!(frame.get_pixel(2, 2).0, [10, 10, 10]);
        assert_eq!(frame.get_pixel(197, 197).0, [10, 10, 10]);
    }
}
