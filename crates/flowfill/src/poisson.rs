//! Sparse weighted Poisson / Laplace solver over masked pixels.
//!
//! Unknown pixels `u_p` minimize `Σ w_pq (u_q − u_p − g_pq)²` over the
//! 4-neighbour links of the grid, with known pixels acting as Dirichlet
//! boundary. With `g = 0` and unit weights this is the harmonic fill; with
//! forward-difference guidance it integrates a gradient field.
//!
//! The normal equations are solved matrix-free with Jacobi-preconditioned
//! conjugate gradients in `f64`. Unknown components with no link to a known
//! pixel are singular; they are excluded and reported as unresolved.

use std::collections::VecDeque;

use crate::config::PoissonConfig;
use crate::error::DegradedReason;
use crate::volume::{Mask, Plane};

const NONE: u32 = u32::MAX;

/// Per-pixel link weights; `wx[p]` links `p` to its right neighbour,
/// `wy[p]` to the one below. A zero weight removes the link.
#[derive(Debug, Clone)]
pub struct LinkWeights {
    width: u32,
    height: u32,
    wx: Vec<f32>,
    wy: Vec<f32>,
}

impl LinkWeights {
    /// Every in-frame link with weight 1.
    pub fn uniform(width: u32, height: u32) -> Self {
        let n = width as usize * height as usize;
        Self {
            width,
            height,
            wx: vec![1.0; n],
            wy: vec![1.0; n],
        }
    }

    /// Links touching an edge pixel (`edges > 0.5`) get `edge_weight`.
    pub fn from_edges(edges: &Plane, edge_weight: f32) -> Self {
        let (w, h) = edges.dimensions();
        let on = |x: u32, y: u32| edges.get_pixel(x, y)[0] > 0.5;
        let mut out = Self::uniform(w, h);
        for y in 0..h {
            for x in 0..w {
                let i = y as usize * w as usize + x as usize;
                if x + 1 < w && (on(x, y) || on(x + 1, y)) {
                    out.wx[i] = edge_weight;
                }
                if y + 1 < h && (on(x, y) || on(x, y + 1)) {
                    out.wy[i] = edge_weight;
                }
            }
        }
        out
    }

    /// Links only where the forward difference is known
    /// (`gradient_unknown[p]` false).
    pub fn known_gradients(gradient_unknown: &Mask) -> Self {
        let (w, h) = gradient_unknown.dimensions();
        let mut out = Self::uniform(w, h);
        for (i, &unknown) in gradient_unknown.as_slice().iter().enumerate() {
            if unknown {
                out.wx[i] = 0.0;
                out.wy[i] = 0.0;
            }
        }
        out
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Which forward difference guides a link, seen from the unknown pixel.
#[derive(Debug, Clone, Copy)]
enum LinkKind {
    Right,
    Left,
    Down,
    Up,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    q: usize,
    w: f64,
    kind: LinkKind,
}

/// Assembled system for one mask and weight set; reusable across channels.
#[derive(Debug, Clone)]
pub struct PoissonSystem {
    width: u32,
    height: u32,
    /// Pixel index of every solved unknown.
    unknowns: Vec<usize>,
    /// Pixel → solved-unknown index, `NONE` for known or unresolved pixels.
    index: Vec<u32>,
    diag: Vec<f64>,
    links: Vec<Vec<Link>>,
    unresolved: Mask,
}

fn neighbours(p: usize, w: u32, h: u32, weights: &LinkWeights) -> impl Iterator<Item = Link> {
    let (x, y) = ((p % w as usize) as u32, (p / w as usize) as u32);
    let wu = w as usize;
    let mut out = [None; 4];
    if x + 1 < w {
        out[0] = Some(Link { q: p + 1, w: weights.wx[p] as f64, kind: LinkKind::Right });
    }
    if x > 0 {
        out[1] = Some(Link { q: p - 1, w: weights.wx[p - 1] as f64, kind: LinkKind::Left });
    }
    if y + 1 < h {
        out[2] = Some(Link { q: p + wu, w: weights.wy[p] as f64, kind: LinkKind::Down });
    }
    if y > 0 {
        out[3] = Some(Link { q: p - wu, w: weights.wy[p - wu] as f64, kind: LinkKind::Up });
    }
    out.into_iter().flatten().filter(|l| l.w > 0.0)
}

impl PoissonSystem {
    /// Assemble the system for the unknown pixels of `mask`.
    pub fn new(mask: &Mask, weights: &LinkWeights) -> Self {
        let (w, h) = mask.dimensions();
        debug_assert_eq!(weights.dimensions(), (w, h));
        let n = w as usize * h as usize;
        let unknown = mask.as_slice();

        // Label unknown components and find the ones touching a known pixel.
        let mut comp = vec![NONE; n];
        let mut anchored = Vec::new();
        let mut queue = VecDeque::new();
        for start in 0..n {
            if !unknown[start] || comp[start] != NONE {
                continue;
            }
            let id = anchored.len() as u32;
            let mut has_anchor = false;
            comp[start] = id;
            queue.push_back(start);
            while let Some(p) = queue.pop_front() {
                for l in neighbours(p, w, h, weights) {
                    if !unknown[l.q] {
                        has_anchor = true;
                    } else if comp[l.q] == NONE {
                        comp[l.q] = id;
                        queue.push_back(l.q);
                    }
                }
            }
            anchored.push(has_anchor);
        }

        let mut index = vec![NONE; n];
        let mut unknowns = Vec::new();
        let mut unresolved = Mask::new(w, h);
        for p in 0..n {
            if !unknown[p] {
                continue;
            }
            if anchored[comp[p] as usize] {
                index[p] = unknowns.len() as u32;
                unknowns.push(p);
            } else {
                unresolved.set((p % w as usize) as u32, (p / w as usize) as u32, true);
            }
        }

        let mut diag = Vec::with_capacity(unknowns.len());
        let mut links = Vec::with_capacity(unknowns.len());
        for &p in &unknowns {
            let ls: Vec<Link> = neighbours(p, w, h, weights).collect();
            diag.push(ls.iter().map(|l| l.w).sum());
            links.push(ls);
        }

        Self {
            width: w,
            height: h,
            unknowns,
            index,
            diag,
            links,
            unresolved,
        }
    }

    /// Unknown pixels with no path to a known value.
    pub fn unresolved(&self) -> &Mask {
        &self.unresolved
    }

    /// Number of unknowns actually solved.
    pub fn len(&self) -> usize {
        self.unknowns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unknowns.is_empty()
    }

    fn apply(&self, x: &[f64], out: &mut [f64]) {
        for (i, links) in self.links.iter().enumerate() {
            let mut acc = self.diag[i] * x[i];
            for l in links {
                let j = self.index[l.q];
                if j != NONE {
                    acc -= l.w * x[j as usize];
                }
            }
            out[i] = acc;
        }
    }

    /// Solve one channel.
    ///
    /// `boundary` supplies known values (and the initial guess for unknowns);
    /// `guidance` is the `(gx, gy)` forward-difference field, `None` for a
    /// harmonic fill. Pixels outside the solved set keep their `boundary`
    /// value.
    pub fn solve(
        &self,
        boundary: &Plane,
        guidance: Option<(&Plane, &Plane)>,
        config: &PoissonConfig,
    ) -> Result<Plane, DegradedReason> {
        debug_assert_eq!(boundary.dimensions(), (self.width, self.height));
        let mut out = boundary.clone();
        let m = self.unknowns.len();
        if m == 0 {
            return Ok(out);
        }
        let bvals = boundary.as_raw();
        let g = |kind: LinkKind, p: usize, q: usize| -> f64 {
            let Some((gx, gy)) = guidance else {
                return 0.0;
            };
            match kind {
                LinkKind::Right => gx.as_raw()[p] as f64,
                LinkKind::Left => -(gx.as_raw()[q] as f64),
                LinkKind::Down => gy.as_raw()[p] as f64,
                LinkKind::Up => -(gy.as_raw()[q] as f64),
            }
        };

        let mut b = vec![0.0f64; m];
        for (i, (&p, links)) in self.unknowns.iter().zip(&self.links).enumerate() {
            let mut acc = 0.0;
            for l in links {
                if self.index[l.q] == NONE {
                    acc += l.w * bvals[l.q] as f64;
                }
                acc -= l.w * g(l.kind, p, l.q);
            }
            b[i] = acc;
        }

        let mut x: Vec<f64> = self
            .unknowns
            .iter()
            .map(|&p| {
                let v = bvals[p] as f64;
                if v.is_finite() {
                    v
                } else {
                    0.0
                }
            })
            .collect();
        let (iters, residual) = self.conjugate_gradient(&b, &mut x, config);
        if x.iter().any(|v| !v.is_finite()) {
            return Err(DegradedReason::NonFinite);
        }
        if residual > config.tolerance {
            return Err(DegradedReason::NotConverged { iters, residual });
        }

        let raw: &mut [f32] = &mut out;
        for (&p, &v) in self.unknowns.iter().zip(&x) {
            raw[p] = v as f32;
        }
        Ok(out)
    }

    fn conjugate_gradient(&self, b: &[f64], x: &mut [f64], config: &PoissonConfig) -> (usize, f64) {
        let m = b.len();
        let dot = |a: &[f64], b: &[f64]| a.iter().zip(b).map(|(u, v)| u * v).sum::<f64>();
        let bnorm = dot(b, b).sqrt();
        let scale = if bnorm > 0.0 { bnorm } else { 1.0 };

        let mut ax = vec![0.0; m];
        self.apply(x, &mut ax);
        let mut r: Vec<f64> = b.iter().zip(&ax).map(|(bi, ai)| bi - ai).collect();
        let mut z: Vec<f64> = r.iter().zip(&self.diag).map(|(ri, d)| ri / d).collect();
        let mut p = z.clone();
        let mut rz = dot(&r, &z);
        let mut ap = vec![0.0; m];

        let mut residual = dot(&r, &r).sqrt() / scale;
        let mut iters = 0;
        while iters < config.max_iters && residual > config.tolerance {
            self.apply(&p, &mut ap);
            let pap = dot(&p, &ap);
            if pap <= 0.0 || !pap.is_finite() {
                break;
            }
            let alpha = rz / pap;
            for i in 0..m {
                x[i] += alpha * p[i];
                r[i] -= alpha * ap[i];
            }
            iters += 1;
            residual = dot(&r, &r).sqrt() / scale;
            if residual <= config.tolerance {
                break;
            }
            for i in 0..m {
                z[i] = r[i] / self.diag[i];
            }
            let rz_new = dot(&r, &z);
            let beta = rz_new / rz;
            rz = rz_new;
            for i in 0..m {
                p[i] = z[i] + beta * p[i];
            }
        }
        (iters, residual)
    }
}

/// Harmonic fill of the unknown pixels of `mask` from the surrounding values.
pub fn harmonic_fill(
    values: &Plane,
    mask: &Mask,
    config: &PoissonConfig,
) -> Result<(Plane, Mask), DegradedReason> {
    let (w, h) = mask.dimensions();
    let system = PoissonSystem::new(mask, &LinkWeights::uniform(w, h));
    let out = system.solve(values, None, config)?;
    Ok((out, system.unresolved().clone()))
}

/// Forward differences `(gx, gy)`, zero at the far edge.
pub fn forward_gradients(plane: &Plane) -> (Plane, Plane) {
    let (w, h) = plane.dimensions();
    let at = |x: u32, y: u32| plane.get_pixel(x, y)[0];
    let gx = Plane::from_fn(w, h, |x, y| {
        image::Luma([if x + 1 < w { at(x + 1, y) - at(x, y) } else { 0.0 }])
    });
    let gy = Plane::from_fn(w, h, |x, y| {
        image::Luma([if y + 1 < h { at(x, y + 1) - at(x, y) } else { 0.0 }])
    });
    (gx, gy)
}
