//! Gradient-domain ("seamless") propagation.
//!
//! Forward differences are propagated instead of colors; each frame is then
//! rebuilt by a Poisson solve whose links exist only where the gradient is
//! known. Pixels the solve cannot reach are seeded by fast-marching
//! inpainting and stay in the mask.

use image::Rgb;
use rayon::prelude::*;

use super::{check_flows, propagate_layers, Layer};
use crate::config::{PoissonConfig, PropagationConfig};
use crate::error::{DegradedEvent, DegradedReason, FlowFillError};
use crate::flow::FlowSet;
use crate::inpaint::telea_inpaint;
use crate::morphology::{fill_holes, gradient_mask};
use crate::poisson::{LinkWeights, PoissonSystem};
use crate::volume::{
    clamp_unit, merge_channels, split_channels, validate_shapes, Frame, Mask, Plane,
};

const SEED_RADIUS: u32 = 3;

/// Per-channel forward differences of one frame, zero at the far edge.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameGradients {
    pub gx: Frame,
    pub gy: Frame,
}

impl FrameGradients {
    pub fn from_frame(frame: &Frame) -> Self {
        let (w, h) = frame.dimensions();
        let diff = |a: &Rgb<f32>, b: &Rgb<f32>| Rgb([b[0] - a[0], b[1] - a[1], b[2] - a[2]]);
        let gx = Frame::from_fn(w, h, |x, y| {
            if x + 1 < w {
                diff(frame.get_pixel(x, y), frame.get_pixel(x + 1, y))
            } else {
                Rgb([0.0; 3])
            }
        });
        let gy = Frame::from_fn(w, h, |x, y| {
            if y + 1 < h {
                diff(frame.get_pixel(x, y), frame.get_pixel(x, y + 1))
            } else {
                Rgb([0.0; 3])
            }
        });
        Self { gx, gy }
    }

    fn to_layer(&self) -> Layer<6> {
        Layer::from_fn(self.gx.width(), self.gx.height(), |x, y| {
            let a = self.gx.get_pixel(x, y).0;
            let b = self.gy.get_pixel(x, y).0;
            [a[0], a[1], a[2], b[0], b[1], b[2]]
        })
    }

    fn from_layer(layer: &Layer<6>) -> Self {
        let (w, h) = (layer.width, layer.height);
        Self {
            gx: Frame::from_fn(w, h, |x, y| {
                let v = layer.get(x, y);
                Rgb([v[0], v[1], v[2]])
            }),
            gy: Frame::from_fn(w, h, |x, y| {
                let v = layer.get(x, y);
                Rgb([v[3], v[4], v[5]])
            }),
        }
    }
}

/// Gradients and gradient masks for a whole video.
pub fn video_gradients(frames: &[Frame], masks: &[Mask]) -> (Vec<FrameGradients>, Vec<Mask>) {
    let gradients = frames.par_iter().map(FrameGradients::from_frame).collect();
    let gmasks = masks.iter().map(gradient_mask).collect();
    (gradients, gmasks)
}

/// Outcome of one seamless propagation pass.
#[derive(Debug, Clone)]
pub struct SeamlessOutcome {
    pub frames: Vec<Frame>,
    /// Color masks: exactly the pixels the Poisson solve left unresolved.
    pub masks: Vec<Mask>,
    pub gradients: Vec<FrameGradients>,
    pub gradient_masks: Vec<Mask>,
    pub degraded: Vec<DegradedEvent>,
}

struct Rebuilt {
    frame: Frame,
    mask: Mask,
    event: Option<DegradedEvent>,
}

fn solve_channels(
    system: &PoissonSystem,
    frame: &Frame,
    gradients: &FrameGradients,
    config: &PoissonConfig,
) -> Result<[Plane; 3], DegradedReason> {
    let planes = split_channels(frame);
    let gx = split_channels(&gradients.gx);
    let gy = split_channels(&gradients.gy);
    Ok([
        system.solve(&planes[0], Some((&gx[0], &gy[0])), config)?,
        system.solve(&planes[1], Some((&gx[1], &gy[1])), config)?,
        system.solve(&planes[2], Some((&gx[2], &gy[2])), config)?,
    ])
}

fn rebuild_frame(
    t: usize,
    frame: &Frame,
    mask: &Mask,
    gradients: &FrameGradients,
    gmask: &Mask,
    config: &PoissonConfig,
) -> Rebuilt {
    if mask.is_empty() {
        return Rebuilt {
            frame: frame.clone(),
            mask: mask.clone(),
            event: None,
        };
    }
    let system = PoissonSystem::new(mask, &LinkWeights::known_gradients(gmask));
    match solve_channels(&system, frame, gradients, config) {
        Ok(channels) => {
            let mut out = merge_channels(&channels);
            clamp_unit(&mut out);
            let unresolved = system.unresolved().clone();
            if !unresolved.is_empty() {
                out = telea_inpaint(&out, &unresolved, SEED_RADIUS);
            }
            Rebuilt {
                frame: out,
                mask: unresolved,
                event: None,
            }
        }
        Err(reason) => {
            tracing::warn!(frame = t, %reason, "poisson reconstruction failed, seeding by inpainting");
            Rebuilt {
                frame: telea_inpaint(frame, mask, SEED_RADIUS),
                mask: mask.clone(),
                event: Some(DegradedEvent::new("poisson reconstruction", t, reason)),
            }
        }
    }
}

/// Propagate gradients along the flow, then rebuild colors by Poisson
/// blending.
pub fn propagate_seamless(
    frames: &[Frame],
    masks: &[Mask],
    gradients: &[FrameGradients],
    gradient_masks: &[Mask],
    flows: &FlowSet,
    propagation: &PropagationConfig,
    poisson: &PoissonConfig,
) -> Result<SeamlessOutcome, FlowFillError> {
    validate_shapes(frames, Some(masks))?;
    validate_shapes(frames, Some(gradient_masks))?;
    let (w, h) = frames[0].dimensions();
    if gradients.len() != frames.len() {
        return Err(FlowFillError::ShapeMismatch {
            what: "gradients vs frames",
            expected: [w as usize, h as usize, frames.len()],
            got: [w as usize, h as usize, gradients.len()],
        });
    }
    check_flows(flows, frames.len(), w, h)?;

    let layers: Vec<Layer<6>> = gradients.iter().map(FrameGradients::to_layer).collect();
    let propagated = propagate_layers(&layers, gradient_masks, flows, propagation);
    let gradients: Vec<FrameGradients> = propagated.values.iter().map(FrameGradients::from_layer).collect();
    let gradient_masks: Vec<Mask> = propagated.masks.iter().map(fill_holes).collect();

    let rebuilt: Vec<Rebuilt> = (0..frames.len())
        .into_par_iter()
        .map(|t| rebuild_frame(t, &frames[t], &masks[t], &gradients[t], &gradient_masks[t], poisson))
        .collect();

    let mut out = SeamlessOutcome {
        frames: Vec::with_capacity(frames.len()),
        masks: Vec::with_capacity(frames.len()),
        gradients,
        gradient_masks,
        degraded: Vec::new(),
    };
    for r in rebuilt {
        out.frames.push(r.frame);
        out.masks.push(r.mask);
        out.degraded.extend(r.event);
    }
    tracing::debug!(
        gradients_resolved = propagated.resolved,
        remaining = crate::volume::count_missing(&out.masks),
        "seamless propagation"
    );
    Ok(out)
}
