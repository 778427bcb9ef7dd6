//! Pairwise flow estimation over a whole video.

use rayon::prelude::*;

use super::estimator::FlowEstimator;
use super::field::{FlowField, FlowSet, FlowVolume, NonLocalFlows};
use super::homography::{estimate_alignment, unwarp_flow, warp_frame};
use crate::config::HomographyConfig;
use crate::direction::Direction;
use crate::error::{DegradedEvent, FlowFillError};
use crate::volume::Frame;

/// Flow volumes plus any homography fallbacks taken while computing them.
#[derive(Debug, Clone)]
pub struct ComputedFlows {
    pub flows: FlowSet,
    pub degraded: Vec<DegradedEvent>,
}

/// Estimate flow for `(a, b)`, optionally through a homography alignment.
///
/// A failed alignment degrades to the identity and is reported alongside
/// the field.
fn estimate_pair(
    estimator: &dyn FlowEstimator,
    a: &Frame,
    b: &Frame,
    homography: Option<&HomographyConfig>,
    frame: usize,
) -> Result<(FlowField, Option<DegradedEvent>), FlowFillError> {
    let estimate = |b: &Frame| {
        estimator
            .estimate_flow(a, b)
            .map_err(|e| FlowFillError::capability("flow estimation", e))
    };
    let Some(config) = homography else {
        return Ok((estimate(b)?, None));
    };
    match estimate_alignment(a, b, config) {
        Ok(alignment) => {
            let warped = warp_frame(b, &alignment);
            let flow = estimate(&warped)?;
            Ok((unwarp_flow(&flow, &alignment), None))
        }
        Err(reason) => {
            tracing::debug!(frame, %reason, "homography fallback to identity");
            Ok((estimate(b)?, Some(DegradedEvent::new("homography", frame, reason))))
        }
    }
}

fn compute_volume(
    frames: &[Frame],
    estimator: &dyn FlowEstimator,
    direction: Direction,
    homography: Option<&HomographyConfig>,
) -> Result<(FlowVolume, Vec<DegradedEvent>), FlowFillError> {
    let n = frames.len();
    let results = (0..direction.field_count(n))
        .into_par_iter()
        .map(|index| {
            let (from, to) = direction.frame_pair(index, n);
            if from == to {
                let (w, h) = frames[from].dimensions();
                return Ok((FlowField::zeros(w, h), None));
            }
            tracing::trace!(%direction, from, to, "estimating flow");
            estimate_pair(estimator, &frames[from], &frames[to], homography, from)
        })
        .collect::<Result<Vec<_>, FlowFillError>>()?;

    let mut fields = Vec::with_capacity(results.len());
    let mut degraded = Vec::new();
    for (field, event) in results {
        fields.push(field);
        degraded.extend(event);
    }
    Ok((FlowVolume::new(direction, n, fields), degraded))
}

/// Forward and backward flow between consecutive frames, plus the non-local
/// anchor flows when `nonlocal` is set.
///
/// Homography compensation applies to non-local pairs only and only when
/// `homography.enable` is set.
pub fn compute_flows(
    frames: &[Frame],
    estimator: &dyn FlowEstimator,
    nonlocal: bool,
    homography: &HomographyConfig,
) -> Result<ComputedFlows, FlowFillError> {
    if frames.len() < 2 {
        return Err(FlowFillError::TooFewFrames(frames.len()));
    }
    let (forward, _) = compute_volume(frames, estimator, Direction::Forward, None)?;
    let (backward, _) = compute_volume(frames, estimator, Direction::Backward, None)?;
    let mut degraded = Vec::new();

    let nonlocal = if nonlocal {
        let h = homography.enable.then_some(homography);
        let (fwd, d1) = compute_volume(frames, estimator, Direction::NonLocalForward, h)?;
        let (bwd, d2) = compute_volume(frames, estimator, Direction::NonLocalBackward, h)?;
        degraded.extend(d1);
        degraded.extend(d2);
        Some(NonLocalFlows {
            forward: fwd,
            backward: bwd,
        })
    } else {
        None
    };

    tracing::info!(
        frames = frames.len(),
        nonlocal = nonlocal.is_some(),
        homography_fallbacks = degraded.len(),
        "flow computed"
    );
    Ok(ComputedFlows {
        flows: FlowSet {
            forward,
            backward,
            nonlocal,
        },
        degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;
    use crate::test_utils::ConstantFlow;

    struct Failing;

    impl FlowEstimator for Failing {
        fn estimate_flow(&self, _: &Frame, _: &Frame) -> Result<FlowField, CapabilityError> {
            Err("boom".into())
        }
    }

    #[test]
    fn volume_sizes_follow_directions() {
        let frames = vec![Frame::new(6, 4); 5];
        let out = compute_flows(&frames, &ConstantFlow([1.0, 0.0]), true, &HomographyConfig::default())
            .unwrap();
        assert_eq!(out.flows.forward.len(), 4);
        assert_eq!(out.flows.backward.len(), 4);
        let nl = out.flows.nonlocal.unwrap();
        assert_eq!(nl.forward.len(), 15);
        // frame 2 is the middle anchor: its own pair is zero flow
        assert_eq!(nl.forward.anchor(2, 1).get(0, 0), [0.0, 0.0]);
        assert_eq!(nl.forward.anchor(2, 0).get(0, 0), [1.0, 0.0]);
    }

    #[test]
    fn estimator_failure_is_fatal_with_stage() {
        let frames = vec![Frame::new(4, 4); 3];
        let err = compute_flows(&frames, &Failing, false, &HomographyConfig::default()).unwrap_err();
        assert!(matches!(err, FlowFillError::Capability { stage: "flow estimation", .. }));
    }

    #[test]
    fn homography_on_black_frames_is_reported_not_fatal() {
        let frames = vec![Frame::new(24, 24); 3];
        let cfg = HomographyConfig {
            enable: true,
            ..HomographyConfig::default()
        };
        let out = compute_flows(&frames, &ConstantFlow([0.0, 0.0]), true, &cfg).unwrap();
        assert!(!out.degraded.is_empty());
        assert!(out.degraded.iter().all(|e| e.stage == "homography"));
    }
}
