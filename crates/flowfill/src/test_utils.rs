//! Shared synthetic frames and capabilities for unit tests.

use image::Rgb;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::CapabilityError;
use crate::flow::{FlowEstimator, FlowField};
use crate::volume::{Frame, Mask};

/// Smooth random texture: Gaussian blobs of varying color on mid gray.
///
/// Blob sigma is 1.5..3 px, so the texture is trackable by both feature
/// matching and variational flow.
pub(crate) fn textured_frame(w: u32, h: u32, seed: u64) -> Frame {
    let mut rng = StdRng::seed_from_u64(seed);
    let n_blobs = ((w * h) / 60).max(4);
    let blobs: Vec<([f32; 2], f32, [f32; 3])> = (0..n_blobs)
        .map(|_| {
            let c = [rng.gen_range(0.0..w as f32), rng.gen_range(0.0..h as f32)];
            let sigma = rng.gen_range(1.5..3.0);
            let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            let amp = [
                sign * rng.gen_range(0.3..0.6),
                sign * rng.gen_range(0.3..0.6),
                sign * rng.gen_range(0.3..0.6),
            ];
            (c, sigma, amp)
        })
        .collect();

    Frame::from_fn(w, h, |x, y| {
        let mut v = [0.5f32; 3];
        for (c, sigma, amp) in &blobs {
            let dx = x as f32 - c[0];
            let dy = y as f32 - c[1];
            let g = (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
            for k in 0..3 {
                v[k] += amp[k] * g;
            }
        }
        Rgb(v.map(|c| c.clamp(0.0, 1.0)))
    })
}

/// `out(x, y) = a(x - dx, y - dy)` with coordinates clamped to the image.
pub(crate) fn shift_frame(a: &Frame, dx: i32, dy: i32) -> Frame {
    let (w, h) = a.dimensions();
    Frame::from_fn(w, h, |x, y| {
        let sx = (x as i64 - dx as i64).clamp(0, w as i64 - 1) as u32;
        let sy = (y as i64 - dy as i64).clamp(0, h as i64 - 1) as u32;
        *a.get_pixel(sx, sy)
    })
}

/// Estimator returning the same vector everywhere.
pub(crate) struct ConstantFlow(pub [f32; 2]);

impl FlowEstimator for ConstantFlow {
    fn estimate_flow(&self, a: &Frame, _b: &Frame) -> Result<FlowField, CapabilityError> {
        let (w, h) = a.dimensions();
        Ok(FlowField::from_fn(w, h, |_, _| self.0))
    }
}

/// A 4×4 red square moving one pixel right per frame over a horizontal ramp.
/// The mask of each frame covers the square.
pub(crate) fn moving_square_video(n: usize, w: u32, h: u32) -> (Vec<Frame>, Vec<Mask>) {
    let y0 = h / 2 - 2;
    let mut frames = Vec::with_capacity(n);
    let mut masks = Vec::with_capacity(n);
    for t in 0..n {
        let x0 = 2 + t as u32;
        let inside = |x: u32, y: u32| (x0..x0 + 4).contains(&x) && (y0..y0 + 4).contains(&y);
        frames.push(Frame::from_fn(w, h, |x, y| {
            if inside(x, y) {
                Rgb([1.0, 0.0, 0.0])
            } else {
                let v = x as f32 / w as f32;
                Rgb([v, v, 0.5])
            }
        }));
        masks.push(Mask::from_fn(w, h, inside));
    }
    (frames, masks)
}
