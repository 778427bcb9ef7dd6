//! Flow edge maps and the edge-completion capability.
//!
//! Edges are detected on the normalized flow magnitude, smoothed over the
//! trusted pixels only; an [`EdgeCompleter`] then hallucinates their
//! continuation inside the trust mask. The completed maps drive the weak
//! links of edge-guided flow completion.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use rayon::prelude::*;

use crate::error::{CapabilityError, FlowFillError};
use crate::flow::{FlowField, FlowVolume};
use crate::morphology::dilate;
use crate::volume::{Mask, Plane};

/// Gaussian pre-smoothing of the magnitude image.
const EDGE_SIGMA: f32 = 2.0;
/// Canny hysteresis thresholds on the 8-bit magnitude image.
const CANNY_LOW: f32 = 20.0;
const CANNY_HIGH: f32 = 50.0;
const EDGE_THRESHOLD: f32 = 0.5;

/// Completes a binary edge map inside a hole.
///
/// `gray` is the normalized flow magnitude with the hole painted white,
/// `edges` the observed edges with the hole cleared. Only values inside
/// `mask` are read back.
pub trait EdgeCompleter: Send + Sync {
    fn complete_edges(&self, gray: &Plane, edges: &Plane, mask: &Mask) -> Result<Plane, CapabilityError>;
}

impl<T: EdgeCompleter + ?Sized> EdgeCompleter for Box<T> {
    fn complete_edges(&self, gray: &Plane, edges: &Plane, mask: &Mask) -> Result<Plane, CapabilityError> {
        (**self).complete_edges(gray, edges, mask)
    }
}

/// Reference [`EdgeCompleter`]: keeps the observed edges and synthesizes
/// nothing inside the hole.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservedEdges;

impl EdgeCompleter for ObservedEdges {
    fn complete_edges(&self, _gray: &Plane, edges: &Plane, _mask: &Mask) -> Result<Plane, CapabilityError> {
        Ok(edges.clone())
    }
}

/// Flow magnitude scaled to `[0, 1]` by its maximum; all-zero stays zero.
pub fn normalized_magnitude(flow: &FlowField) -> Plane {
    let mut mag = flow.magnitude();
    let max = flow.max_magnitude();
    if max > 0.0 {
        for v in mag.iter_mut() {
            *v = if v.is_finite() { *v / max } else { 0.0 };
        }
    }
    mag
}

/// Gaussian smoothing that only averages pixels outside `mask`.
///
/// Masked pixels get the weighted mean of nearby trusted values, or the
/// trusted mean where no trusted pixel is within reach.
fn masked_smooth(magnitude: &Plane, mask: &Mask) -> Plane {
    let (w, h) = magnitude.dimensions();
    let weight = Plane::from_fn(w, h, |x, y| Luma([if mask.get(x, y) { 0.0 } else { 1.0 }]));
    let trusted = Plane::from_fn(w, h, |x, y| {
        Luma([if mask.get(x, y) { 0.0 } else { magnitude.get_pixel(x, y)[0] }])
    });
    let n_trusted = (w as usize * h as usize).saturating_sub(mask.count());
    let mean = if n_trusted > 0 {
        trusted.iter().sum::<f32>() / n_trusted as f32
    } else {
        0.0
    };
    let num = imageproc::filter::gaussian_blur_f32(&trusted, EDGE_SIGMA);
    let den = imageproc::filter::gaussian_blur_f32(&weight, EDGE_SIGMA);
    Plane::from_fn(w, h, |x, y| {
        let d = den.get_pixel(x, y)[0];
        Luma([if d > 1e-6 { num.get_pixel(x, y)[0] / d } else { mean }])
    })
}

/// Canny edges of the normalized magnitude over the trusted region.
///
/// Values inside `mask` never reach the smoothing, and responses within one
/// pixel of the mask are dropped.
pub fn observed_edges(magnitude: &Plane, mask: &Mask) -> Plane {
    let smooth = masked_smooth(magnitude, mask);
    let gray = GrayImage::from_fn(smooth.width(), smooth.height(), |x, y| {
        Luma([(smooth.get_pixel(x, y)[0].clamp(0.0, 1.0) * 255.0).round() as u8])
    });
    let edges = imageproc::edges::canny(&gray, CANNY_LOW, CANNY_HIGH);
    let excluded = dilate(mask, Norm::LInf, 1);
    Plane::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([if edges.get_pixel(x, y)[0] > 0 && !excluded.get(x, y) { 1.0 } else { 0.0 }])
    })
}

fn edge_map(
    flow: &FlowField,
    trust: &Mask,
    completer: &dyn EdgeCompleter,
) -> Result<Plane, FlowFillError> {
    let magnitude = normalized_magnitude(flow);
    let observed = observed_edges(&magnitude, trust);
    if trust.is_empty() {
        return Ok(observed);
    }
    let mut gray = magnitude;
    for (x, y) in trust.iter_set() {
        gray.put_pixel(x, y, Luma([1.0]));
    }
    let completed = completer
        .complete_edges(&gray, &observed, trust)
        .map_err(|e| FlowFillError::capability("edge completion", e))?;
    if completed.dimensions() != observed.dimensions() {
        return Err(FlowFillError::ShapeMismatch {
            what: "completed edges vs flow",
            expected: [observed.width() as usize, observed.height() as usize, 1],
            got: [completed.width() as usize, completed.height() as usize, 1],
        });
    }
    let mut out = observed;
    for (x, y) in trust.iter_set() {
        out.put_pixel(x, y, Luma([completed.get_pixel(x, y)[0]]));
    }
    for v in out.iter_mut() {
        *v = if *v > EDGE_THRESHOLD { 1.0 } else { 0.0 };
    }
    Ok(out)
}

/// One completed binary edge map per field of a local flow volume.
pub fn complete_flow_edges(
    volume: &FlowVolume,
    trust_masks: &[Mask],
    completer: &dyn EdgeCompleter,
) -> Result<Vec<Plane>, FlowFillError> {
    let direction = volume.direction();
    if direction.is_nonlocal() {
        return Err(FlowFillError::EdgeGuidanceUnsupported(direction));
    }
    let n = volume.n_frames();
    if trust_masks.len() != n {
        return Err(FlowFillError::ShapeMismatch {
            what: "trust masks vs flow frames",
            expected: [0, 0, n],
            got: [0, 0, trust_masks.len()],
        });
    }
    let maps = volume
        .fields()
        .par_iter()
        .enumerate()
        .map(|(i, f)| edge_map(f, &trust_masks[direction.trust_frame(i, n)], completer))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(%direction, maps = maps.len(), "flow edges completed");
    Ok(maps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direction::Direction;

    struct FillAll;

    impl EdgeCompleter for FillAll {
        fn complete_edges(&self, _: &Plane, edges: &Plane, _: &Mask) -> Result<Plane, CapabilityError> {
            Ok(Plane::from_pixel(edges.width(), edges.height(), Luma([0.9])))
        }
    }

    fn split_flow() -> FlowField {
        FlowField::from_fn(32, 24, |x, _| if x < 16 { [3.0, 0.0] } else { [0.0, 0.0] })
    }

    #[test]
    fn zero_flow_has_no_edges() {
        let mag = normalized_magnitude(&FlowField::zeros(8, 8));
        assert!(mag.iter().all(|&v| v == 0.0));
        assert!(observed_edges(&mag, &Mask::new(8, 8)).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn motion_boundary_is_detected_outside_mask_only() {
        let flow = split_flow();
        let mask = Mask::from_fn(32, 24, |_, y| y < 12);
        let edges = observed_edges(&normalized_magnitude(&flow), &mask);
        let lower: f32 = (12..24).flat_map(|y| (12..20).map(move |x| (x, y))).map(|(x, y)| edges.get_pixel(x, y)[0]).sum();
        let upper: f32 = (0..12).flat_map(|y| (0..32).map(move |x| (x, y))).map(|(x, y)| edges.get_pixel(x, y)[0]).sum();
        assert!(lower > 0.0);
        assert_eq!(upper, 0.0);
    }

    #[test]
    fn fast_flow_inside_hole_leaves_no_edges_around_it() {
        let hole = Mask::from_fn(40, 30, |x, y| (15..25).contains(&x) && (10..20).contains(&y));
        let flow = FlowField::from_fn(40, 30, |x, y| if hole.get(x, y) { [30.0, 0.0] } else { [1.0, 0.0] });
        let edges = observed_edges(&normalized_magnitude(&flow), &hole);
        let trusted_edges = (0..30)
            .flat_map(|y| (0..40).map(move |x| (x, y)))
            .filter(|&(x, y)| !hole.get(x, y) && edges.get_pixel(x, y)[0] > 0.0)
            .count();
        assert_eq!(trusted_edges, 0);
    }

    #[test]
    fn completer_output_only_replaces_masked_pixels() {
        let vol = FlowVolume::new(Direction::Forward, 2, vec![FlowField::zeros(8, 8)]);
        let mask = Mask::from_fn(8, 8, |x, y| x < 2 && y < 2);
        let maps = complete_flow_edges(&vol, &[mask, Mask::new(8, 8)], &FillAll).unwrap();
        assert_eq!(maps[0].get_pixel(0, 0)[0], 1.0);
        assert_eq!(maps[0].get_pixel(5, 5)[0], 0.0);
    }

    #[test]
    fn nonlocal_volumes_are_rejected() {
        let vol = FlowVolume::new(Direction::NonLocalBackward, 2, vec![FlowField::zeros(4, 4); 6]);
        let err = complete_flow_edges(&vol, &[Mask::new(4, 4), Mask::new(4, 4)], &ObservedEdges).unwrap_err();
        assert!(matches!(err, FlowFillError::EdgeGuidanceUnsupported(_)));
    }
}
