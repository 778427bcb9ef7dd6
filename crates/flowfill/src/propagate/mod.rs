//! Flow-guided propagation of known pixels into the missing region.
//!
//! For each unknown pixel the propagator follows the local flow chains
//! forward (`t → t+1 → …`) and backward (`t → t−1 → …`) until it lands on a
//! known pixel, and optionally hops once to each non-local anchor frame.
//! Candidates are then aggregated:
//!
//! - local candidates take precedence over non-local ones;
//! - the smallest temporal distance wins;
//! - ties go to the lowest accumulated consistency error (then forward,
//!   backward, anchor order) when a consistency threshold is set, and are
//!   averaged otherwise.
//!
//! All reads come from the input snapshot so frames can be processed in
//! parallel without order effects.

pub mod gradient;

use rayon::prelude::*;

use crate::config::PropagationConfig;
use crate::direction::{anchor_frames, NUM_ANCHORS};
use crate::error::FlowFillError;
use crate::flow::{FlowField, FlowSet};
use crate::volume::{Frame, Mask};

pub use gradient::{propagate_seamless, video_gradients, FrameGradients, SeamlessOutcome};

// ── Value layers ───────────────────────────────────────────────────────────

/// `C`-channel per-pixel values (color, or stacked gradients).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Layer<const C: usize> {
    width: u32,
    height: u32,
    data: Vec<[f32; C]>,
}

impl<const C: usize> Layer<C> {
    pub(crate) fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> [f32; C]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    #[inline]
    pub(crate) fn get(&self, x: u32, y: u32) -> [f32; C] {
        self.data[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub(crate) fn set(&mut self, x: u32, y: u32, v: [f32; C]) {
        let i = y as usize * self.width as usize + x as usize;
        self.data[i] = v;
    }

    /// Bilinear sample when all four taps are known in `mask`, otherwise the
    /// nearest pixel.
    fn sample(&self, mask: &Mask, x: f32, y: f32) -> [f32; C] {
        let x = x.clamp(0.0, (self.width - 1) as f32);
        let y = y.clamp(0.0, (self.height - 1) as f32);
        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let taps_known =
            !mask.get(x0, y0) && !mask.get(x1, y0) && !mask.get(x0, y1) && !mask.get(x1, y1);
        if !taps_known {
            return self.get(x.round() as u32, y.round() as u32);
        }
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;
        let (a, b, c, d) = (self.get(x0, y0), self.get(x1, y0), self.get(x0, y1), self.get(x1, y1));
        std::array::from_fn(|k| {
            let top = a[k] * (1.0 - fx) + b[k] * fx;
            let bottom = c[k] * (1.0 - fx) + d[k] * fx;
            top * (1.0 - fy) + bottom * fy
        })
    }
}

pub(crate) fn frame_to_layer(frame: &Frame) -> Layer<3> {
    Layer::from_fn(frame.width(), frame.height(), |x, y| frame.get_pixel(x, y).0)
}

// ── Candidate search ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    frame: usize,
    x: f32,
    y: f32,
    /// Temporal distance in frames.
    distance: usize,
    /// Accumulated forward/backward consistency error.
    error: f32,
    /// Tie-break rank: 0 forward, 1 backward, 2 + anchor slot.
    rank: usize,
}

impl Candidate {
    fn is_local(&self) -> bool {
        self.rank < 2
    }
}

struct Tracer<'a> {
    flows: &'a FlowSet,
    masks: &'a [Mask],
    config: &'a PropagationConfig,
    n: usize,
    width: u32,
    height: u32,
}

impl Tracer<'_> {
    fn nearest(&self, x: f32, y: f32) -> Option<(u32, u32)> {
        let (xr, yr) = (x.round(), y.round());
        (xr >= 0.0 && yr >= 0.0 && xr < self.width as f32 && yr < self.height as f32)
            .then_some((xr as u32, yr as u32))
    }

    fn exceeds(&self, error: f32) -> bool {
        self.config.consistency_threshold.is_some_and(|th| error > th)
    }

    /// One hop along `flow`, checked against `reverse` at the landing point.
    fn hop(&self, flow: &FlowField, reverse: &FlowField, x: f32, y: f32) -> Option<(f32, f32, f32)> {
        let [u, v] = flow.sample(x, y);
        let (nx, ny) = (x + u, y + v);
        if !(nx.is_finite() && ny.is_finite()) {
            return None;
        }
        self.nearest(nx, ny)?;
        let [ru, rv] = reverse.sample(nx, ny);
        let err = ((u + ru).powi(2) + (v + rv).powi(2)).sqrt();
        Some((nx, ny, err))
    }

    fn trace_local(&self, t: usize, x: u32, y: u32, forward: bool) -> Option<Candidate> {
        let (mut px, mut py) = (x as f32, y as f32);
        let mut cur = t;
        let mut error = 0.0f32;
        let max_steps = self.config.max_trace_steps.unwrap_or(usize::MAX);
        for step in 1..=max_steps {
            let (next, flow, reverse) = if forward {
                if cur + 1 >= self.n {
                    return None;
                }
                (cur + 1, self.flows.forward.field(cur), self.flows.backward.field(cur))
            } else {
                if cur == 0 {
                    return None;
                }
                (cur - 1, self.flows.backward.field(cur - 1), self.flows.forward.field(cur - 1))
            };
            let (nx, ny, err) = self.hop(flow, reverse, px, py)?;
            error += err;
            if self.exceeds(error) {
                return None;
            }
            let (ix, iy) = self.nearest(nx, ny)?;
            if !self.masks[next].get(ix, iy) {
                return Some(Candidate {
                    frame: next,
                    x: nx,
                    y: ny,
                    distance: step,
                    error,
                    rank: if forward { 0 } else { 1 },
                });
            }
            (px, py, cur) = (nx, ny, next);
        }
        None
    }

    fn trace_nonlocal(&self, t: usize, x: u32, y: u32, out: &mut Vec<Candidate>) {
        let Some(nl) = &self.flows.nonlocal else {
            return;
        };
        for (slot, &anchor) in anchor_frames(self.n).iter().enumerate() {
            if anchor == t {
                continue;
            }
            let flow = nl.forward.anchor(t, slot);
            let reverse = nl.backward.anchor(t, slot);
            let Some((nx, ny, err)) = self.hop(flow, reverse, x as f32, y as f32) else {
                continue;
            };
            if self.exceeds(err) {
                continue;
            }
            let Some((ix, iy)) = self.nearest(nx, ny) else {
                continue;
            };
            if !self.masks[anchor].get(ix, iy) {
                out.push(Candidate {
                    frame: anchor,
                    x: nx,
                    y: ny,
                    distance: anchor.abs_diff(t),
                    error: err,
                    rank: 2 + slot,
                });
            }
        }
    }

    fn candidates(&self, t: usize, x: u32, y: u32) -> Vec<Candidate> {
        let mut out = Vec::with_capacity(2 + NUM_ANCHORS);
        out.extend(self.trace_local(t, x, y, true));
        out.extend(self.trace_local(t, x, y, false));
        if out.is_empty() {
            self.trace_nonlocal(t, x, y, &mut out);
        }
        out
    }
}

/// Pick the candidates that contribute to a pixel.
fn select(candidates: &[Candidate], ranked_ties: bool) -> Vec<Candidate> {
    let local: Vec<Candidate> = candidates.iter().copied().filter(Candidate::is_local).collect();
    let pool = if local.is_empty() { candidates.to_vec() } else { local };
    let Some(min_d) = pool.iter().map(|c| c.distance).min() else {
        return Vec::new();
    };
    let tied: Vec<Candidate> = pool.into_iter().filter(|c| c.distance == min_d).collect();
    if ranked_ties {
        tied.into_iter()
            .min_by(|a, b| a.error.total_cmp(&b.error).then(a.rank.cmp(&b.rank)))
            .into_iter()
            .collect()
    } else {
        tied
    }
}

// ── Propagation core ───────────────────────────────────────────────────────

/// Result of one propagation pass over a `C`-channel volume.
pub(crate) struct Propagated<const C: usize> {
    pub values: Vec<Layer<C>>,
    pub masks: Vec<Mask>,
    pub resolved: usize,
}

pub(crate) fn check_flows(flows: &FlowSet, n: usize, width: u32, height: u32) -> Result<(), FlowFillError> {
    for vol in flows.volumes() {
        let direction = vol.direction();
        if vol.len() != direction.field_count(n) {
            return Err(FlowFillError::ShapeMismatch {
                what: "flow fields vs frames",
                expected: [width as usize, height as usize, direction.field_count(n)],
                got: [width as usize, height as usize, vol.len()],
            });
        }
        if let Some(field) = vol.fields().iter().find(|f| f.dimensions() != (width, height)) {
            return Err(FlowFillError::ShapeMismatch {
                what: "flow fields vs frames",
                expected: [width as usize, height as usize, vol.len()],
                got: [field.width() as usize, field.height() as usize, vol.len()],
            });
        }
    }
    Ok(())
}

pub(crate) fn propagate_layers<const C: usize>(
    values: &[Layer<C>],
    masks: &[Mask],
    flows: &FlowSet,
    config: &PropagationConfig,
) -> Propagated<C> {
    let n = values.len();
    let (width, height) = masks.first().map(Mask::dimensions).unwrap_or((0, 0));
    let tracer = Tracer {
        flows,
        masks,
        config,
        n,
        width,
        height,
    };
    let ranked_ties = config.consistency_threshold.is_some();

    let per_frame: Vec<(Layer<C>, Mask, usize)> = (0..n)
        .into_par_iter()
        .map(|t| {
            let mut layer = values[t].clone();
            let mut mask = masks[t].clone();
            let mut resolved = 0usize;
            for (x, y) in masks[t].iter_set() {
                let chosen = select(&tracer.candidates(t, x, y), ranked_ties);
                if chosen.is_empty() {
                    continue;
                }
                let mut acc = [0.0f32; C];
                for c in &chosen {
                    let v = values[c.frame].sample(&masks[c.frame], c.x, c.y);
                    for k in 0..C {
                        acc[k] += v[k];
                    }
                }
                let inv = 1.0 / chosen.len() as f32;
                layer.set(x, y, acc.map(|a| a * inv));
                mask.set(x, y, false);
                resolved += 1;
            }
            (layer, mask, resolved)
        })
        .collect();

    let mut out = Propagated {
        values: Vec::with_capacity(n),
        masks: Vec::with_capacity(n),
        resolved: 0,
    };
    for (layer, mask, resolved) in per_frame {
        out.values.push(layer);
        out.masks.push(mask);
        out.resolved += resolved;
    }
    out
}

/// Copy known colors along the flow into the unknown pixels of every frame.
///
/// Returns the updated frames and masks; a mask keeps exactly the pixels no
/// candidate was found for.
pub fn propagate_color(
    frames: &[Frame],
    masks: &[Mask],
    flows: &FlowSet,
    config: &PropagationConfig,
) -> Result<(Vec<Frame>, Vec<Mask>), FlowFillError> {
    crate::volume::validate_shapes(frames, Some(masks))?;
    let (w, h) = frames[0].dimensions();
    check_flows(flows, frames.len(), w, h)?;

    let layers: Vec<Layer<3>> = frames.iter().map(frame_to_layer).collect();
    let before = crate::volume::count_missing(masks);
    let out = propagate_layers(&layers, masks, flows, config);
    tracing::debug!(before, resolved = out.resolved, "color propagated");

    let frames = frames
        .iter()
        .zip(&out.values)
        .zip(masks)
        .map(|((frame, layer), mask)| {
            let mut f = frame.clone();
            for (x, y) in mask.iter_set() {
                f.put_pixel(x, y, image::Rgb(layer.get(x, y)));
            }
            f
        })
        .collect();
    Ok((frames, out.masks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direction::Direction;
    use crate::flow::{FlowVolume, NonLocalFlows};

    fn cand(frame: usize, distance: usize, error: f32, rank: usize) -> Candidate {
        Candidate {
            frame,
            x: 0.0,
            y: 0.0,
            distance,
            error,
            rank,
        }
    }

    #[test]
    fn local_candidates_shadow_nonlocal() {
        let cs = [cand(4, 3, 0.0, 0), cand(0, 1, 0.0, 2)];
        let chosen = select(&cs, false);
        assert_eq!(chosen, vec![cs[0]]);
    }

    #[test]
    fn ties_average_without_threshold_and_rank_with_one() {
        let cs = [cand(3, 1, 0.5, 0), cand(1, 1, 0.1, 1), cand(5, 3, 0.0, 0)];
        assert_eq!(select(&cs, false).len(), 2);
        assert_eq!(select(&cs, true), vec![cs[1]]);
    }

    fn constant_flows(n: usize, w: u32, h: u32, d: [f32; 2]) -> FlowSet {
        let f = |dir: Direction, v: [f32; 2]| {
            FlowVolume::new(dir, n, vec![FlowField::from_fn(w, h, |_, _| v); dir.field_count(n)])
        };
        FlowSet {
            forward: f(Direction::Forward, d),
            backward: f(Direction::Backward, [-d[0], -d[1]]),
            nonlocal: None,
        }
    }

    #[test]
    fn translation_chain_lands_on_shifted_pixel() {
        // content moves +1 px in x per frame
        let (n, w, h) = (3, 6, 3);
        let frames: Vec<Frame> = (0..n)
            .map(|t| Frame::from_fn(w, h, |x, _| image::Rgb([(x as f32 - t as f32) * 0.1 + 0.3; 3])))
            .collect();
        let mut masks = vec![Mask::new(w, h); n];
        masks[0].set(2, 1, true);
        masks[1].set(3, 1, true);
        let flows = constant_flows(n, w, h, [1.0, 0.0]);
        let (out, out_masks) = propagate_color(&frames, &masks, &flows, &PropagationConfig::default()).unwrap();
        assert!(out_masks.iter().all(Mask::is_empty));
        // frame 0 (2,1) skips masked frame 1 (3,1) and lands on frame 2 (4,1)
        assert!((out[0].get_pixel(2, 1)[0] - frames[0].get_pixel(2, 1)[0]).abs() < 1e-6);
        assert!((out[1].get_pixel(3, 1)[0] - frames[1].get_pixel(3, 1)[0]).abs() < 1e-6);
    }

    #[test]
    fn chain_leaving_frame_yields_nothing() {
        let (n, w, h) = (2, 4, 2);
        let frames = vec![Frame::new(w, h); n];
        let mut masks = vec![Mask::new(w, h); n];
        masks[0].set(3, 0, true);
        let flows = constant_flows(n, w, h, [2.0, 0.0]);
        let (_, out_masks) = propagate_color(&frames, &masks, &flows, &PropagationConfig::default()).unwrap();
        assert!(out_masks[0].get(3, 0));
    }

    #[test]
    fn inconsistent_flow_is_rejected_by_threshold() {
        let (n, w, h) = (2, 4, 4);
        let frames = vec![Frame::new(w, h); n];
        let mut masks = vec![Mask::new(w, h); n];
        masks[0].set(1, 1, true);
        let mut flows = constant_flows(n, w, h, [1.0, 0.0]);
        // reverse flow disagrees by 1.5 px
        flows.backward = FlowVolume::new(
            Direction::Backward,
            n,
            vec![FlowField::from_fn(w, h, |_, _| [0.5, 0.0])],
        );
        let cfg = PropagationConfig {
            consistency_threshold: Some(1.0),
            ..PropagationConfig::default()
        };
        let (_, m) = propagate_color(&frames, &masks, &flows, &cfg).unwrap();
        assert!(m[0].get(1, 1));
        let (_, m) = propagate_color(&frames, &masks, &flows, &PropagationConfig::default()).unwrap();
        assert!(!m[0].get(1, 1));
    }

    #[test]
    fn every_flow_field_is_size_checked() {
        let (n, w, h) = (3, 4, 4);
        let frames = vec![Frame::new(w, h); n];
        let masks = vec![Mask::new(w, h); n];
        let mut flows = constant_flows(n, w, h, [0.0, 0.0]);
        // only the last field is off
        flows.forward = FlowVolume::new(
            Direction::Forward,
            n,
            vec![FlowField::zeros(w, h), FlowField::zeros(w + 1, h)],
        );
        let err = propagate_color(&frames, &masks, &flows, &PropagationConfig::default()).unwrap_err();
        assert!(matches!(err, FlowFillError::ShapeMismatch { got: [5, 4, 2], .. }));
    }

    #[test]
    fn nonlocal_used_only_without_local_candidate() {
        let (n, w, h) = (5, 4, 4);
        let frames: Vec<Frame> = (0..n)
            .map(|t| Frame::from_pixel(w, h, image::Rgb([t as f32 * 0.1; 3])))
            .collect();
        // frame 1 pixel unknown, neighbours 0 and 2 unknown too at that spot
        let mut masks = vec![Mask::new(w, h); n];
        for t in 0..4 {
            masks[t].set(1, 1, true);
        }
        let mut flows = constant_flows(n, w, h, [0.0, 0.0]);
        let zero = |dir: Direction| {
            FlowVolume::new(dir, n, vec![FlowField::zeros(w, h); dir.field_count(n)])
        };
        flows.nonlocal = Some(NonLocalFlows {
            forward: zero(Direction::NonLocalForward),
            backward: zero(Direction::NonLocalBackward),
        });
        let (out, m) = propagate_color(&frames, &masks, &flows, &PropagationConfig::default()).unwrap();
        // local chain from frame 1 reaches frame 4 (distance 3); non-local ignored
        assert!(!m[1].get(1, 1));
        assert!((out[1].get_pixel(1, 1)[0] - 0.4).abs() < 1e-6);
    }
}
