//! Flow completion inside the trust mask.
//!
//! Two policies:
//! - smooth: each component is a harmonic fill of the trusted boundary;
//! - edge-guided: the gradient of the field is zeroed where it is unknown and
//!   re-integrated with weak links across completed flow edges, so motion
//!   boundaries stay sharp.
//!
//! A failure on one field degrades only that field (edge-guided → smooth →
//! zero flow) and is returned as a [`DegradedEvent`].

use rayon::prelude::*;

use crate::config::PoissonConfig;
use crate::error::{DegradedEvent, DegradedReason, FlowFillError};
use crate::flow::{FlowField, FlowVolume};
use crate::morphology::gradient_mask;
use crate::poisson::{forward_gradients, LinkWeights, PoissonSystem};
use crate::volume::{Mask, Plane};

/// Per-field completion result.
struct Completed {
    field: FlowField,
    events: Vec<DegradedEvent>,
}

fn stage_name(volume: &FlowVolume) -> String {
    format!("flow completion ({})", volume.direction())
}

fn zero_inside(field: &FlowField, mask: &Mask) -> FlowField {
    let mut out = field.clone();
    for (x, y) in mask.iter_set() {
        out.set(x, y, [0.0, 0.0]);
    }
    out
}

fn smooth(field: &FlowField, trust: &Mask, config: &PoissonConfig) -> Result<(FlowField, Mask), DegradedReason> {
    let (w, h) = field.dimensions();
    let system = PoissonSystem::new(trust, &LinkWeights::uniform(w, h));
    let [u, v] = field.to_planes();
    let u = system.solve(&u, None, config)?;
    let v = system.solve(&v, None, config)?;
    Ok((FlowField::from_planes(&u, &v), system.unresolved().clone()))
}

fn edge_guided(
    field: &FlowField,
    trust: &Mask,
    edges: &Plane,
    config: &PoissonConfig,
) -> Result<(FlowField, Mask), DegradedReason> {
    let gmask = gradient_mask(trust);
    let system = PoissonSystem::new(trust, &LinkWeights::from_edges(edges, config.edge_link_weight));
    let planes = field.to_planes();
    let mut solved: Vec<Plane> = Vec::with_capacity(2);
    for p in &planes {
        let (mut gx, mut gy) = forward_gradients(p);
        for (x, y) in gmask.iter_set() {
            gx.put_pixel(x, y, image::Luma([0.0]));
            gy.put_pixel(x, y, image::Luma([0.0]));
        }
        solved.push(system.solve(p, Some((&gx, &gy)), config)?);
    }
    Ok((
        FlowField::from_planes(&solved[0], &solved[1]),
        system.unresolved().clone(),
    ))
}

fn complete_field(
    field: &FlowField,
    trust: &Mask,
    edges: Option<&Plane>,
    config: &PoissonConfig,
    stage: &str,
    frame: usize,
) -> Completed {
    if trust.is_empty() {
        return Completed {
            field: field.clone(),
            events: Vec::new(),
        };
    }
    let mut events = Vec::new();
    let attempt = match edges {
        Some(e) => edge_guided(field, trust, e, config).or_else(|reason| {
            tracing::warn!(frame, %reason, "edge-guided completion failed, using smooth fill");
            events.push(DegradedEvent::new(stage, frame, reason));
            smooth(field, trust, config)
        }),
        None => smooth(field, trust, config),
    };
    let field = match attempt {
        Ok((completed, unresolved)) => {
            if unresolved.is_empty() {
                completed
            } else {
                let n = unresolved.count();
                tracing::debug!(frame, n, "flow pixels without trusted boundary set to zero");
                events.push(DegradedEvent::new(stage, frame, DegradedReason::Unanchored(n)));
                zero_inside(&completed, &unresolved)
            }
        }
        Err(reason) => {
            tracing::warn!(frame, %reason, "flow completion failed, zeroing masked flow");
            events.push(DegradedEvent::new(stage, frame, reason));
            zero_inside(field, trust)
        }
    };
    Completed { field, events }
}

/// Complete every field of `volume` inside its trust mask.
///
/// `trust_masks` holds one mask per video frame; field `i` uses the mask of
/// `direction.trust_frame(i)`. `edges`, when given, holds one completed edge
/// map per field and selects the edge-guided policy, which only local
/// volumes support.
pub fn complete_flow(
    volume: &FlowVolume,
    trust_masks: &[Mask],
    edges: Option<&[Plane]>,
    config: &PoissonConfig,
) -> Result<(FlowVolume, Vec<DegradedEvent>), FlowFillError> {
    let direction = volume.direction();
    let n = volume.n_frames();
    if edges.is_some() && direction.is_nonlocal() {
        return Err(FlowFillError::EdgeGuidanceUnsupported(direction));
    }
    if trust_masks.len() != n {
        return Err(FlowFillError::ShapeMismatch {
            what: "trust masks vs flow frames",
            expected: [0, 0, n],
            got: [0, 0, trust_masks.len()],
        });
    }
    if let Some(e) = edges {
        if e.len() != volume.len() {
            return Err(FlowFillError::ShapeMismatch {
                what: "edge maps vs flow fields",
                expected: [0, 0, volume.len()],
                got: [0, 0, e.len()],
            });
        }
    }
    if let (Some((w, h)), Some(m)) = (volume.dimensions(), trust_masks.first()) {
        if m.dimensions() != (w, h) {
            return Err(FlowFillError::ShapeMismatch {
                what: "trust masks vs flow fields",
                expected: [w as usize, h as usize, n],
                got: [m.width() as usize, m.height() as usize, n],
            });
        }
    }

    let stage = stage_name(volume);
    let results: Vec<Completed> = volume
        .fields()
        .par_iter()
        .enumerate()
        .map(|(i, field)| {
            let trust = &trust_masks[direction.trust_frame(i, n)];
            let edge = edges.map(|e| &e[i]);
            complete_field(field, trust, edge, config, &stage, i)
        })
        .collect();

    let mut fields = Vec::with_capacity(results.len());
    let mut events = Vec::new();
    for c in results {
        fields.push(c.field);
        events.extend(c.events);
    }
    tracing::debug!(%direction, fields = fields.len(), degraded = events.len(), "flow completed");
    Ok((FlowVolume::new(direction, n, fields), events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direction::Direction;

    fn square_mask(w: u32, h: u32) -> Mask {
        Mask::from_fn(w, h, |x, y| (3..7).contains(&x) && (2..6).contains(&y))
    }

    #[test]
    fn empty_trust_mask_is_identity() {
        let field = FlowField::from_fn(8, 6, |x, y| [x as f32 * 0.3, -(y as f32)]);
        let vol = FlowVolume::new(Direction::Forward, 3, vec![field.clone(), field.clone()]);
        let masks = vec![Mask::new(8, 6); 3];
        let (out, events) = complete_flow(&vol, &masks, None, &PoissonConfig::default()).unwrap();
        assert!(events.is_empty());
        assert_eq!(out.fields(), vol.fields());
    }

    #[test]
    fn smooth_completion_matches_constant_surround() {
        let truth = FlowField::from_fn(10, 8, |_, _| [1.5, -0.5]);
        let mask = square_mask(10, 8);
        let corrupted = FlowField::from_fn(10, 8, |x, y| {
            if mask.get(x, y) {
                [40.0, 40.0]
            } else {
                truth.get(x, y)
            }
        });
        let vol = FlowVolume::new(Direction::Forward, 2, vec![corrupted]);
        let masks = vec![mask.clone(), Mask::new(10, 8)];
        let (out, _) = complete_flow(&vol, &masks, None, &PoissonConfig::default()).unwrap();
        for (x, y) in mask.iter_set() {
            let [u, v] = out.field(0).get(x, y);
            assert!((u - 1.5).abs() < 1e-3 && (v + 0.5).abs() < 1e-3);
        }
    }

    #[test]
    fn backward_fields_use_next_frame_mask() {
        let field = FlowField::from_fn(10, 8, |_, _| [9.0, 9.0]);
        let vol = FlowVolume::new(Direction::Backward, 2, vec![field]);
        // frame 1 is the source of backward pair 0
        let masks = vec![Mask::new(10, 8), square_mask(10, 8)];
        let (out, _) = complete_flow(&vol, &masks, None, &PoissonConfig::default()).unwrap();
        assert_eq!(out.field(0).get(4, 3), [9.0, 9.0]);

        let masks = vec![square_mask(10, 8), Mask::new(10, 8)];
        let field = FlowField::from_fn(10, 8, |x, _| if x >= 3 && x < 7 { [0.0, 0.0] } else { [9.0, 9.0] });
        let vol = FlowVolume::new(Direction::Backward, 2, vec![field.clone()]);
        let (out, _) = complete_flow(&vol, &masks, None, &PoissonConfig::default()).unwrap();
        assert_eq!(out.field(0), &field);
    }

    #[test]
    fn edge_guidance_on_nonlocal_is_rejected() {
        let vol = FlowVolume::new(Direction::NonLocalForward, 2, vec![FlowField::zeros(4, 4); 6]);
        let masks = vec![Mask::new(4, 4); 2];
        let edges = vec![Plane::new(4, 4); 6];
        let err = complete_flow(&vol, &masks, Some(&edges), &PoissonConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            FlowFillError::EdgeGuidanceUnsupported(Direction::NonLocalForward)
        ));
    }

    #[test]
    fn fully_masked_field_degrades_to_zero() {
        let field = FlowField::from_fn(4, 4, |_, _| [3.0, 3.0]);
        let vol = FlowVolume::new(Direction::Forward, 2, vec![field]);
        let masks = vec![Mask::filled(4, 4), Mask::new(4, 4)];
        let (out, events) = complete_flow(&vol, &masks, None, &PoissonConfig::default()).unwrap();
        assert_eq!(out.field(0).max_magnitude(), 0.0);
        assert!(matches!(events[0].reason, DegradedReason::Unanchored(16)));
    }

    #[test]
    fn edge_guided_keeps_step_across_edge() {
        // left half moves right, right half moves left; hole straddles the boundary
        let truth = FlowField::from_fn(16, 8, |x, _| if x < 8 { [2.0, 0.0] } else { [-2.0, 0.0] });
        let mask = Mask::from_fn(16, 8, |x, y| (4..12).contains(&x) && (2..6).contains(&y));
        let edges = Plane::from_fn(16, 8, |x, _| image::Luma([if x == 8 { 1.0 } else { 0.0 }]));
        let vol = FlowVolume::new(Direction::Forward, 2, vec![truth.clone()]);
        let masks = vec![mask, Mask::new(16, 8)];
        let edge_vol = vec![edges];
        let (guided, _) = complete_flow(&vol, &masks, Some(&edge_vol), &PoissonConfig::default()).unwrap();
        let (plain, _) = complete_flow(&vol, &masks, None, &PoissonConfig::default()).unwrap();
        let step = |f: &FlowField| f.get(7, 3)[0] - f.get(8, 3)[0];
        assert!(step(guided.field(0)) > step(plain.field(0)));
    }
}
