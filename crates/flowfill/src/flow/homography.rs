//! Camera-motion compensation for non-local frame pairs.
//!
//! Distant frames are first aligned with a homography fitted on sparse
//! feature matches, flow is estimated between the aligned pair, and the
//! result is carried back to raw pixel coordinates. A failed alignment is a
//! [`DegradedReason`]; [`compute_flows`](super::compute_flows) then uses the
//! identity.

use image::Rgb;
use nalgebra::{DMatrix, Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::features::match_frames;
use super::field::FlowField;
use crate::config::HomographyConfig;
use crate::error::DegradedReason;
use crate::volume::{sample_rgb_bilinear, Frame};

/// A planar homography is pinned down by four point pairs.
const MIN_PAIRS: usize = 4;

// ── Projection ───────────────────────────────────────────────────────────

/// Map `(x, y)` through `h` in homogeneous coordinates.
///
/// Points on the line at infinity come back as NaN.
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> [f64; 2] {
    let q = h * Vector3::new(x, y, 1.0);
    let w = q.z;
    if w.abs() < 1e-15 {
        [f64::NAN, f64::NAN]
    } else {
        [q.x / w, q.y / w]
    }
}

fn transfer_error(h: &Matrix3<f64>, from: [f64; 2], to: [f64; 2]) -> f64 {
    let [px, py] = project(h, from[0], from[1]);
    (px - to[0]).hypot(py - to[1])
}

/// Similarity that centres `pts` and brings their mean radius to √2.
fn conditioning(pts: &[[f64; 2]]) -> Matrix3<f64> {
    let inv_n = 1.0 / pts.len() as f64;
    let (mx, my) = pts
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0] * inv_n, sy + p[1] * inv_n));
    let radius: f64 = pts.iter().map(|p| (p[0] - mx).hypot(p[1] - my)).sum::<f64>() * inv_n;
    let k = if radius > 1e-15 {
        std::f64::consts::SQRT_2 / radius
    } else {
        1.0
    };
    Matrix3::new(k, 0.0, -k * mx, 0.0, k, -k * my, 0.0, 0.0, 1.0)
}

fn apply(t: &Matrix3<f64>, p: [f64; 2]) -> [f64; 2] {
    [t[(0, 0)] * p[0] + t[(0, 2)], t[(1, 1)] * p[1] + t[(1, 2)]]
}

// ── Direct linear transform ──────────────────────────────────────────────

/// The two constraint rows `from ↦ to` contributes to the DLT system.
fn dlt_rows(from: [f64; 2], to: [f64; 2]) -> [[f64; 9]; 2] {
    let [x, y] = from;
    let [u, v] = to;
    [
        [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v],
        [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, -u],
    ]
}

/// Least-squares homography with `to[i] ≈ project(H, from[i])`.
///
/// Both point sets are conditioned before the solve; the result is scaled
/// so that `H[(2, 2)] == 1`.
pub fn estimate_homography_dlt(
    from: &[[f64; 2]],
    to: &[[f64; 2]],
) -> Result<Matrix3<f64>, DegradedReason> {
    if from.len() != to.len() {
        return Err(DegradedReason::Singular(format!(
            "{} source points against {} targets",
            from.len(),
            to.len()
        )));
    }
    let n = from.len();
    if n < MIN_PAIRS {
        return Err(DegradedReason::TooFewCorrespondences {
            needed: MIN_PAIRS,
            got: n,
        });
    }

    let t_from = conditioning(from);
    let t_to = conditioning(to);

    // pad to 9 rows so the SVD always exposes a ninth singular vector
    let rows = (2 * n).max(9);
    let mut system = DMatrix::<f64>::zeros(rows, 9);
    for (i, (&f, &t)) in from.iter().zip(to).enumerate() {
        for (k, row) in dlt_rows(apply(&t_from, f), apply(&t_to, t)).iter().enumerate() {
            for (c, &value) in row.iter().enumerate() {
                system[(2 * i + k, c)] = value;
            }
        }
    }

    let svd = system.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| DegradedReason::Singular("SVD did not return V".into()))?;
    let smallest = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map_or(8, |(i, _)| i);
    let conditioned = Matrix3::from_fn(|r, c| v_t[(smallest, 3 * r + c)]);

    let undo_to = t_to
        .try_inverse()
        .ok_or_else(|| DegradedReason::Singular("degenerate target points".into()))?;
    let h = undo_to * conditioned * t_from;
    let h22 = h[(2, 2)];
    if h22.abs() < 1e-15 {
        return Err(DegradedReason::Singular("homography maps origin to infinity".into()));
    }
    let h = h / h22;
    if h.iter().all(|v| v.is_finite()) {
        Ok(h)
    } else {
        Err(DegradedReason::NonFinite)
    }
}

// ── Robust fit ───────────────────────────────────────────────────────────

/// Settings of the RANSAC loop wrapped around the DLT.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentRansac {
    /// Hypotheses drawn before giving up.
    pub iterations: usize,
    /// Transfer error, in pixels, under which a match supports a hypothesis.
    pub inlier_px: f64,
    /// Support below this is reported as a failed alignment.
    pub min_inliers: usize,
    pub seed: u64,
}

impl Default for AlignmentRansac {
    fn default() -> Self {
        Self {
            iterations: 2000,
            inlier_px: 4.0,
            min_inliers: MIN_PAIRS,
            seed: 0,
        }
    }
}

/// Homography refitted on its consensus set.
#[derive(Debug, Clone)]
pub struct RobustHomography {
    pub h: Matrix3<f64>,
    /// Per-pair support flag under the refitted model.
    pub supports: Vec<bool>,
    pub support: usize,
}

fn support_of(h: &Matrix3<f64>, from: &[[f64; 2]], to: &[[f64; 2]], px: f64) -> Vec<bool> {
    from.iter()
        .zip(to)
        .map(|(&f, &t)| transfer_error(h, f, t) < px)
        .collect()
}

fn pick(points: &[[f64; 2]], keep: &[bool]) -> Vec<[f64; 2]> {
    points
        .iter()
        .zip(keep)
        .filter_map(|(p, &k)| k.then_some(*p))
        .collect()
}

/// Fit `to ≈ H from` while tolerating mismatched pairs.
///
/// Stops early once a hypothesis is supported by more than 90% of pairs.
pub fn fit_homography_ransac(
    from: &[[f64; 2]],
    to: &[[f64; 2]],
    config: &AlignmentRansac,
) -> Result<RobustHomography, DegradedReason> {
    let n = from.len().min(to.len());
    if n < MIN_PAIRS {
        return Err(DegradedReason::TooFewCorrespondences {
            needed: MIN_PAIRS,
            got: n,
        });
    }
    let (from, to) = (&from[..n], &to[..n]);
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut best: Option<(Matrix3<f64>, Vec<bool>, usize)> = None;
    for _ in 0..config.iterations {
        let draw = sample(&mut rng, n, MIN_PAIRS);
        let f: Vec<_> = draw.iter().map(|i| from[i]).collect();
        let t: Vec<_> = draw.iter().map(|i| to[i]).collect();
        let Ok(h) = estimate_homography_dlt(&f, &t) else {
            continue;
        };
        let supports = support_of(&h, from, to, config.inlier_px);
        let count = supports.iter().filter(|&&s| s).count();
        if best.as_ref().map_or(true, |b| count > b.2) {
            best = Some((h, supports, count));
            if count * 10 > n * 9 {
                break;
            }
        }
    }

    let needed = config.min_inliers.max(MIN_PAIRS);
    let (h0, supports, count) = match best {
        Some(b) if b.2 >= needed => b,
        other => {
            return Err(DegradedReason::InsufficientInliers {
                needed,
                found: other.map_or(0, |b| b.2),
            })
        }
    };

    let h = estimate_homography_dlt(&pick(from, &supports), &pick(to, &supports)).unwrap_or(h0);
    let supports = support_of(&h, from, to, config.inlier_px);
    let support = supports.iter().filter(|&&s| s).count();
    tracing::trace!(pairs = n, first_support = count, support, "homography fit");
    Ok(RobustHomography { h, supports, support })
}

// ── Frame alignment ──────────────────────────────────────────────────────

/// Homography mapping pixels of `b` onto `a`, with its inverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameAlignment {
    pub h: Matrix3<f64>,
    pub h_inv: Matrix3<f64>,
}

impl FrameAlignment {
    pub fn identity() -> Self {
        Self {
            h: Matrix3::identity(),
            h_inv: Matrix3::identity(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.h == Matrix3::identity()
    }
}

/// Estimate the homography taking frame `b` into frame `a`.
pub fn estimate_alignment(
    a: &Frame,
    b: &Frame,
    config: &HomographyConfig,
) -> Result<FrameAlignment, DegradedReason> {
    let (pts_b, pts_a) = match_frames(a, b, config);
    let fit = fit_homography_ransac(&pts_b, &pts_a, &config.ransac)?;
    let h_inv = fit
        .h
        .try_inverse()
        .ok_or_else(|| DegradedReason::Singular("homography not invertible".into()))?;
    if h_inv.iter().any(|v| !v.is_finite()) {
        return Err(DegradedReason::NonFinite);
    }
    Ok(FrameAlignment { h: fit.h, h_inv })
}

/// Resample `b` into `a`'s frame: `out(p) = b(H⁻¹ p)`; zero outside `b`.
pub fn warp_frame(b: &Frame, alignment: &FrameAlignment) -> Frame {
    let (w, h) = b.dimensions();
    Frame::from_fn(w, h, |x, y| {
        let [sx, sy] = project(&alignment.h_inv, x as f64, y as f64);
        let inside = sx.is_finite()
            && sy.is_finite()
            && sx >= 0.0
            && sy >= 0.0
            && sx <= (w - 1) as f64
            && sy <= (h - 1) as f64;
        if inside {
            Rgb(sample_rgb_bilinear(b, sx as f32, sy as f32))
        } else {
            Rgb([0.0; 3])
        }
    })
}

/// Transport flow estimated on `(a, warp(b))` to raw `b` coordinates:
/// `flow(p) = H⁻¹(p + f(p)) − p`.
pub fn unwarp_flow(flow: &FlowField, alignment: &FrameAlignment) -> FlowField {
    let (w, h) = flow.dimensions();
    FlowField::from_fn(w, h, |x, y| {
        let [u, v] = flow.get(x, y);
        let [qx, qy] = project(&alignment.h_inv, (x as f32 + u) as f64, (y as f32 + v) as f64);
        let out = [(qx - x as f64) as f32, (qy - y as f64) as f32];
        if out[0].is_finite() && out[1].is_finite() {
            out
        } else {
            [u, v]
        }
    })
}
