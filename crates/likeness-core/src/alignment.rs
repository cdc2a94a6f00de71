//! Five-point face alignment.
//!
//! Fits a similarity transform (scale, rotation, translation) from detected
//! landmarks to the ArcFace reference layout and warps the face into a
//! 112×112 RGB crop.

use image::{Rgb, RgbImage};

/// Side of the aligned crop.
pub const ALIGNED_SIZE: usize = 112;

/// ArcFace reference landmarks in a 112×112 crop.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Similarity transform `dst = [a -b; b a] · src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit over centered point sets.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (smx, smy) = mean(src);
        let (dmx, dmy) = mean(dst);

        let (mut dot, mut cross, mut energy) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - smx, sy - smy);
            let (dx, dy) = (dx - dmx, dy - dmy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            energy += sx * sx + sy * sy;
        }
        if energy < 1e-6 {
            return None;
        }

        let a = dot / energy;
        let b = cross / energy;
        Some(Self {
            a,
            b,
            tx: dmx - (a * smx - b * smy),
            ty: dmy - (b * smx + a * smy),
        })
    }

    #[cfg(test)]
    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (self.a * x - self.b * y + self.tx, self.b * x + self.a * y + self.ty)
    }

    /// Map a destination point back into the source image.
    fn invert(&self, (x, y): (f32, f32)) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (u, v) = (x - self.tx, y - self.ty);
        Some(((self.a * u + self.b * v) / det, (-self.b * u + self.a * v) / det))
    }
}

/// Bilinear sample; outside pixels read as black.
fn sample(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);

    let at = |px: i64, py: i64| -> [f32; 3] {
        if px < 0 || py < 0 || px >= image.width() as i64 || py >= image.height() as i64 {
            return [0.0; 3];
        }
        let p = image.get_pixel(px as u32, py as u32).0;
        [p[0] as f32, p[1] as f32, p[2] as f32]
    };

    let (tl, tr, bl, br) = (at(x0, y0), at(x0 + 1, y0), at(x0, y0 + 1), at(x0 + 1, y0 + 1));
    Rgb(std::array::from_fn(|c| {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bottom = bl[c] * (1.0 - fx) + br[c] * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    }))
}

/// Warp the face described by `landmarks` into an aligned 112×112 crop.
///
/// Degenerate landmarks (all at one point) produce a black crop.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let size = ALIGNED_SIZE as u32;
    let Some(transform) = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS) else {
        tracing::warn!("degenerate landmarks; alignment produced an empty crop");
        return RgbImage::new(size, size);
    };

    RgbImage::from_fn(size, size, |ox, oy| match transform.invert((ox as f32, oy as f32)) {
        Some((sx, sy)) => sample(image, sx, sy),
        None => Rgb([0, 0, 0]),
    })
}
