//! Fast-marching exemplar inpainting (Telea 2004) and the single-image fill
//! capability.
//!
//! The boundary of the hole advances in order of arrival time `T`; each
//! newly reached pixel is a weighted average of the known pixels within
//! `radius`, favouring close pixels, pixels on the same level set and
//! pixels along the marching normal.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use image::Rgb;
use serde::{Deserialize, Serialize};

use crate::error::CapabilityError;
use crate::volume::{Frame, Mask};

/// Fill every pixel of `mask` in `frame`.
///
/// Implementations must return a frame of the same size; only the masked
/// pixels are read back by the pipeline.
pub trait FrameFiller: Send + Sync {
    fn fill(&self, frame: &Frame, mask: &Mask) -> Result<Frame, CapabilityError>;
}

impl<T: FrameFiller + ?Sized> FrameFiller for Box<T> {
    fn fill(&self, frame: &Frame, mask: &Mask) -> Result<Frame, CapabilityError> {
        (**self).fill(frame, mask)
    }
}

/// Reference [`FrameFiller`] backed by [`telea_inpaint`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeleaFiller {
    /// Neighbourhood radius in pixels.
    pub radius: u32,
}

impl Default for TeleaFiller {
    fn default() -> Self {
        Self { radius: 3 }
    }
}

impl FrameFiller for TeleaFiller {
    fn fill(&self, frame: &Frame, mask: &Mask) -> Result<Frame, CapabilityError> {
        if frame.dimensions() != mask.dimensions() {
            return Err(format!(
                "frame {:?} and mask {:?} differ in size",
                frame.dimensions(),
                mask.dimensions()
            )
            .into());
        }
        Ok(telea_inpaint(frame, mask, self.radius))
    }
}

// ── Fast marching ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Known,
    Band,
    Inside,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    t: f32,
    idx: usize,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    // min-heap on arrival time, ties by raster order
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .t
            .total_cmp(&self.t)
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

struct Marcher<'a> {
    w: usize,
    h: usize,
    state: Vec<State>,
    t: Vec<f32>,
    img: &'a mut Frame,
}

impl Marcher<'_> {
    fn at(&self, x: i64, y: i64) -> Option<usize> {
        (x >= 0 && y >= 0 && (x as usize) < self.w && (y as usize) < self.h)
            .then(|| y as usize * self.w + x as usize)
    }

    /// Eikonal update from two orthogonal neighbours.
    fn solve(&self, a: Option<usize>, b: Option<usize>) -> f32 {
        let usable = |i: Option<usize>| i.filter(|&i| self.state[i] != State::Inside);
        match (usable(a), usable(b)) {
            (Some(i), Some(j)) => {
                let (d1, d2) = (self.t[i], self.t[j]);
                let disc = 2.0 - (d1 - d2) * (d1 - d2);
                if disc > 0.0 {
                    let r = disc.sqrt();
                    let s = (d1 + d2 - r) / 2.0;
                    if s >= d1 && s >= d2 {
                        return s;
                    }
                    let s = s + r;
                    if s >= d1 && s >= d2 {
                        return s;
                    }
                }
                1.0 + d1.min(d2)
            }
            (Some(i), None) | (None, Some(i)) => 1.0 + self.t[i],
            (None, None) => f32::INFINITY,
        }
    }

    fn arrival_time(&self, x: i64, y: i64) -> f32 {
        let up = self.at(x, y - 1);
        let down = self.at(x, y + 1);
        let left = self.at(x - 1, y);
        let right = self.at(x + 1, y);
        self.solve(up, left)
            .min(self.solve(down, left))
            .min(self.solve(up, right))
            .min(self.solve(down, right))
    }

    fn grad_t(&self, x: i64, y: i64) -> [f32; 2] {
        let ok = |i: Option<usize>| i.filter(|&i| self.state[i] != State::Inside && self.t[i].is_finite());
        let centre = self.at(x, y).map(|i| self.t[i]).unwrap_or(0.0);
        let axis = |prev: Option<usize>, next: Option<usize>| match (ok(prev), ok(next)) {
            (Some(p), Some(n)) => (self.t[n] - self.t[p]) * 0.5,
            (None, Some(n)) => self.t[n] - centre,
            (Some(p), None) => centre - self.t[p],
            (None, None) => 0.0,
        };
        [
            axis(self.at(x - 1, y), self.at(x + 1, y)),
            axis(self.at(x, y - 1), self.at(x, y + 1)),
        ]
    }

    fn inpaint_pixel(&mut self, x: i64, y: i64, radius: i64) {
        let Some(p) = self.at(x, y) else {
            return;
        };
        let grad = self.grad_t(x, y);
        let mut acc = [0.0f32; 3];
        let mut wsum = 0.0f32;
        for ny in (y - radius)..=(y + radius) {
            for nx in (x - radius)..=(x + radius) {
                let Some(q) = self.at(nx, ny) else {
                    continue;
                };
                if q == p || self.state[q] == State::Inside {
                    continue;
                }
                let (rx, ry) = ((x - nx) as f32, (y - ny) as f32);
                let d2 = rx * rx + ry * ry;
                if d2 > (radius * radius) as f32 {
                    continue;
                }
                let len = d2.sqrt();
                let dir = ((rx * grad[0] + ry * grad[1]) / len).abs().max(1e-6);
                let dst = 1.0 / d2;
                let lev = 1.0 / (1.0 + (self.t[q] - self.t[p]).abs());
                let w = dir * dst * lev;
                let v = self.img.get_pixel(nx as u32, ny as u32).0;
                for c in 0..3 {
                    acc[c] += w * v[c];
                }
                wsum += w;
            }
        }
        if wsum > 0.0 {
            self.img
                .put_pixel(x as u32, y as u32, Rgb([acc[0] / wsum, acc[1] / wsum, acc[2] / wsum]));
        }
    }
}

/// Telea inpainting of the `true` pixels of `mask`.
///
/// Pixels unreachable from any known pixel (an all-unknown frame) keep their
/// input value.
pub fn telea_inpaint(frame: &Frame, mask: &Mask, radius: u32) -> Frame {
    let mut out = frame.clone();
    if mask.is_empty() || mask.count() == mask.as_slice().len() {
        return out;
    }
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let unknown = mask.as_slice();
    let mut m = Marcher {
        w,
        h,
        state: unknown
            .iter()
            .map(|&u| if u { State::Inside } else { State::Known })
            .collect(),
        t: unknown
            .iter()
            .map(|&u| if u { f32::INFINITY } else { 0.0 })
            .collect(),
        img: &mut out,
    };

    // Known pixels bordering the hole seed the front.
    let mut heap = BinaryHeap::new();
    for i in 0..w * h {
        if unknown[i] {
            continue;
        }
        let (x, y) = ((i % w) as i64, (i / w) as i64);
        let borders = [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
            .into_iter()
            .any(|(nx, ny)| m.at(nx, ny).is_some_and(|q| unknown[q]));
        if borders {
            m.state[i] = State::Band;
            heap.push(Node { t: 0.0, idx: i });
        }
    }

    let radius = radius.max(1) as i64;
    while let Some(Node { idx, .. }) = heap.pop() {
        if m.state[idx] == State::Known {
            continue;
        }
        m.state[idx] = State::Known;
        let (x, y) = ((idx % w) as i64, (idx / w) as i64);
        for (nx, ny) in [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)] {
            let Some(q) = m.at(nx, ny) else {
                continue;
            };
            if m.state[q] != State::Inside {
                continue;
            }
            let t = m.arrival_time(nx, ny);
            m.t[q] = t;
            m.inpaint_pixel(nx, ny, radius);
            m.state[q] = State::Band;
            heap.push(Node { t, idx: q });
        }
    }
    out
}
