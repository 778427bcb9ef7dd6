//! Dense optical-flow capability and a variational reference estimator.

use image::Luma;
use serde::{Deserialize, Serialize};

use super::field::FlowField;
use crate::error::CapabilityError;
use crate::volume::{Frame, Plane};

/// Dense optical flow between two equally sized frames.
///
/// The returned field maps every pixel `p` of `a` to `p + f(p)` in `b`.
pub trait FlowEstimator: Send + Sync {
    fn estimate_flow(&self, a: &Frame, b: &Frame) -> Result<FlowField, CapabilityError>;
}

impl<T: FlowEstimator + ?Sized> FlowEstimator for Box<T> {
    fn estimate_flow(&self, a: &Frame, b: &Frame) -> Result<FlowField, CapabilityError> {
        (**self).estimate_flow(a, b)
    }
}

/// Coarse-to-fine Horn–Schunck flow on luma.
///
/// Each pyramid level warps `b` by the current estimate and relaxes the
/// linearized brightness-constancy energy with Jacobi sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HornSchunck {
    /// Smoothness weight (intensity units, frames in `[0, 1]`).
    pub alpha: f32,
    /// Jacobi sweeps per pyramid level.
    pub iterations: usize,
    /// Maximum pyramid depth (1 = single scale).
    pub levels: usize,
    /// Stop building the pyramid below this side length.
    pub min_size: u32,
}

impl Default for HornSchunck {
    fn default() -> Self {
        Self {
            alpha: 0.06,
            iterations: 120,
            levels: 4,
            min_size: 16,
        }
    }
}

fn luma(frame: &Frame) -> Plane {
    Plane::from_fn(frame.width(), frame.height(), |x, y| {
        let p = frame.get_pixel(x, y);
        Luma([0.299 * p[0] + 0.587 * p[1] + 0.114 * p[2]])
    })
}

/// 2×2 box downsample.
fn downsample(p: &Plane) -> Plane {
    let (w, h) = p.dimensions();
    let (nw, nh) = ((w / 2).max(1), (h / 2).max(1));
    Plane::from_fn(nw, nh, |x, y| {
        let x0 = (2 * x).min(w - 1);
        let y0 = (2 * y).min(h - 1);
        let x1 = (x0 + 1).min(w - 1);
        let y1 = (y0 + 1).min(h - 1);
        let s = p.get_pixel(x0, y0)[0]
            + p.get_pixel(x1, y0)[0]
            + p.get_pixel(x0, y1)[0]
            + p.get_pixel(x1, y1)[0];
        Luma([s * 0.25])
    })
}

fn sample_plane(p: &Plane, x: f32, y: f32) -> f32 {
    let (w, h) = p.dimensions();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let top = p.get_pixel(x0, y0)[0] * (1.0 - fx) + p.get_pixel(x1, y0)[0] * fx;
    let bottom = p.get_pixel(x0, y1)[0] * (1.0 - fx) + p.get_pixel(x1, y1)[0] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Resize a flow field to `(w, h)`, scaling vectors with the resolution.
fn upsample_flow(flow: &FlowField, w: u32, h: u32) -> FlowField {
    let (fw, fh) = flow.dimensions();
    let sx = w as f32 / fw as f32;
    let sy = h as f32 / fh as f32;
    FlowField::from_fn(w, h, |x, y| {
        let [u, v] = flow.sample((x as f32 + 0.5) / sx - 0.5, (y as f32 + 0.5) / sy - 0.5);
        [u * sx, v * sy]
    })
}

impl HornSchunck {
    fn refine(&self, i1: &Plane, i2: &Plane, init: FlowField) -> FlowField {
        let (w, h) = i1.dimensions();
        let idx = |x: u32, y: u32| y as usize * w as usize + x as usize;

        let warped = Plane::from_fn(w, h, |x, y| {
            let [u, v] = init.get(x, y);
            Luma([sample_plane(i2, x as f32 + u, y as f32 + v)])
        });
        let grad = |img: &Plane, x: u32, y: u32| -> [f32; 2] {
            let xl = x.saturating_sub(1);
            let xr = (x + 1).min(w - 1);
            let yu = y.saturating_sub(1);
            let yd = (y + 1).min(h - 1);
            let dx = (img.get_pixel(xr, y)[0] - img.get_pixel(xl, y)[0]) / (xr - xl).max(1) as f32;
            let dy = (img.get_pixel(x, yd)[0] - img.get_pixel(x, yu)[0]) / (yd - yu).max(1) as f32;
            [dx, dy]
        };

        let n = w as usize * h as usize;
        let mut ix = vec![0.0f32; n];
        let mut iy = vec![0.0f32; n];
        let mut it = vec![0.0f32; n];
        for y in 0..h {
            for x in 0..w {
                let g1 = grad(i1, x, y);
                let g2 = grad(&warped, x, y);
                let i = idx(x, y);
                ix[i] = 0.5 * (g1[0] + g2[0]);
                iy[i] = 0.5 * (g1[1] + g2[1]);
                it[i] = warped.get_pixel(x, y)[0] - i1.get_pixel(x, y)[0];
            }
        }

        let u0: Vec<[f32; 2]> = init.as_slice().to_vec();
        let mut cur = u0.clone();
        let mut next = u0.clone();
        let a2 = self.alpha * self.alpha;
        for _ in 0..self.iterations {
            for y in 0..h {
                for x in 0..w {
                    let mut avg = [0.0f32; 2];
                    let mut k = 0.0f32;
                    for (nx, ny) in [
                        (x.wrapping_sub(1), y),
                        (x + 1, y),
                        (x, y.wrapping_sub(1)),
                        (x, y + 1),
                    ] {
                        if nx < w && ny < h {
                            let q = cur[idx(nx, ny)];
                            avg[0] += q[0];
                            avg[1] += q[1];
                            k += 1.0;
                        }
                    }
                    let i = idx(x, y);
                    if k == 0.0 {
                        avg = cur[i];
                    } else {
                        avg[0] /= k;
                        avg[1] /= k;
                    }
                    let d0 = u0[i];
                    let t = (ix[i] * (avg[0] - d0[0]) + iy[i] * (avg[1] - d0[1]) + it[i])
                        / (a2 + ix[i] * ix[i] + iy[i] * iy[i]);
                    next[i] = [avg[0] - ix[i] * t, avg[1] - iy[i] * t];
                }
            }
            std::mem::swap(&mut cur, &mut next);
        }
        FlowField::from_vec(w, h, cur).unwrap_or_else(|| FlowField::zeros(w, h))
    }
}

impl FlowEstimator for HornSchunck {
    fn estimate_flow(&self, a: &Frame, b: &Frame) -> Result<FlowField, CapabilityError> {
        if a.dimensions() != b.dimensions() {
            return Err(format!(
                "frame sizes differ: {:?} vs {:?}",
                a.dimensions(),
                b.dimensions()
            )
            .into());
        }
        let mut pyr1 = vec![luma(a)];
        let mut pyr2 = vec![luma(b)];
        while pyr1.len() < self.levels.max(1) {
            let top = &pyr1[pyr1.len() - 1];
            if top.width() / 2 < self.min_size || top.height() / 2 < self.min_size {
                break;
            }
            let d1 = downsample(top);
            let d2 = downsample(&pyr2[pyr2.len() - 1]);
            pyr1.push(d1);
            pyr2.push(d2);
        }

        let (cw, ch) = pyr1[pyr1.len() - 1].dimensions();
        let mut flow = FlowField::zeros(cw, ch);
        for (i1, i2) in pyr1.iter().zip(&pyr2).rev() {
            let (w, h) = i1.dimensions();
            if flow.dimensions() != (w, h) {
                flow = upsample_flow(&flow, w, h);
            }
            flow = self.refine(i1, i2, flow);
        }
        if flow.as_slice().iter().any(|f| !f[0].is_finite() || !f[1].is_finite()) {
            return Err("flow estimate contains non-finite values".into());
        }
        Ok(flow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{shift_frame, textured_frame};

    #[test]
    fn identical_frames_give_near_zero_flow() {
        let a = textured_frame(48, 40, 1);
        let f = HornSchunck::default().estimate_flow(&a, &a).unwrap();
        assert!(f.max_magnitude() < 1e-3);
    }

    #[test]
    fn recovers_horizontal_translation() {
        let a = textured_frame(64, 48, 5);
        let b = shift_frame(&a, 2, 0);
        let f = HornSchunck::default().estimate_flow(&a, &b).unwrap();
        let (mut su, mut sv, mut n) = (0.0f32, 0.0f32, 0.0f32);
        for y in 12..36 {
            for x in 12..52 {
                let [u, v] = f.get(x, y);
                su += u;
                sv += v;
                n += 1.0;
            }
        }
        let (mu, mv) = (su / n, sv / n);
        assert!((mu - 2.0).abs() < 0.6, "mean u = {mu}");
        assert!(mv.abs() < 0.4, "mean v = {mv}");
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let a = Frame::new(8, 8);
        let b = Frame::new(9, 8);
        assert!(HornSchunck::default().estimate_flow(&a, &b).is_err());
    }
}
