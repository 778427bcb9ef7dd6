//! PROPAGATE / FILL convergence loop.

use imageproc::distance_transform::Norm;
use rayon::prelude::*;

use super::StageObserver;
use crate::config::{CompletionConfig, FillStrategy};
use crate::error::{DegradedEvent, FlowFillError};
use crate::flow::FlowSet;
use crate::inpaint::{telea_inpaint, FrameFiller};
use crate::morphology::dilate;
use crate::propagate::{propagate_color, propagate_seamless, video_gradients, FrameGradients};
use crate::result::IterationReport;
use crate::volume::{count_missing, Frame, Mask};

const SEED_RADIUS: u32 = 3;

/// State carried between iterations.
pub(crate) struct LoopState {
    pub frames: Vec<Frame>,
    pub masks: Vec<Mask>,
    /// Seamless mode only.
    gradients: Option<(Vec<FrameGradients>, Vec<Mask>)>,
}

impl LoopState {
    pub fn new(frames: Vec<Frame>, masks: Vec<Mask>, seamless: bool) -> Self {
        if !seamless {
            return Self {
                frames,
                masks,
                gradients: None,
            };
        }
        // Gradients of seeded frames so the unknown region starts smooth.
        let frames: Vec<Frame> = frames
            .par_iter()
            .zip(&masks)
            .map(|(f, m)| telea_inpaint(f, m, SEED_RADIUS))
            .collect();
        let gradients = Some(video_gradients(&frames, &masks));
        Self {
            frames,
            masks,
            gradients,
        }
    }

    fn refresh_gradients(&mut self) {
        if self.gradients.is_some() {
            self.gradients = Some(video_gradients(&self.frames, &self.masks));
        }
    }
}

/// Outcome of the loop.
pub(crate) struct LoopOutcome {
    pub iterations: Vec<IterationReport>,
    pub converged: bool,
    pub degraded: Vec<DegradedEvent>,
}

/// Frames the FILL step hands to the filler.
pub(crate) fn select_fill_frames(masks: &[Mask], strategy: FillStrategy) -> Vec<usize> {
    match strategy {
        FillStrategy::AllFrames => (0..masks.len()).filter(|&t| !masks[t].is_empty()).collect(),
        FillStrategy::KeyFrame => {
            let best = masks
                .iter()
                .enumerate()
                .filter(|(_, m)| !m.is_empty())
                .max_by(|(ia, a), (ib, b)| a.count().cmp(&b.count()).then(ib.cmp(ia)));
            best.map(|(t, _)| vec![t]).unwrap_or_default()
        }
    }
}

/// Fill the selected frames with the single-image filler and clear their
/// masks. The filler sees each mask dilated by `radius`.
pub(crate) fn fill_frames(
    state: &mut LoopState,
    selected: &[usize],
    filler: &dyn FrameFiller,
    radius: u8,
) -> Result<(), FlowFillError> {
    let filled: Vec<(usize, Frame)> = selected
        .par_iter()
        .map(|&t| {
            let fill_mask = dilate(&state.masks[t], Norm::L1, radius);
            let frame = &state.frames[t];
            let out = filler
                .fill(frame, &fill_mask)
                .map_err(|e| FlowFillError::capability("frame fill", e))?;
            if out.dimensions() != frame.dimensions() {
                return Err(FlowFillError::ShapeMismatch {
                    what: "filled frame vs input",
                    expected: [frame.width() as usize, frame.height() as usize, 1],
                    got: [out.width() as usize, out.height() as usize, 1],
                });
            }
            let mut pasted = frame.clone();
            for (x, y) in fill_mask.iter_set() {
                let mut p = *out.get_pixel(x, y);
                p.0.iter_mut().for_each(|v| *v = v.clamp(0.0, 1.0));
                pasted.put_pixel(x, y, p);
            }
            Ok((t, pasted))
        })
        .collect::<Result<_, FlowFillError>>()?;

    for (t, frame) in filled {
        state.frames[t] = frame;
        state.masks[t].clear();
    }
    Ok(())
}

fn propagate_once(
    state: &mut LoopState,
    flows: &FlowSet,
    config: &CompletionConfig,
    degraded: &mut Vec<DegradedEvent>,
) -> Result<(), FlowFillError> {
    match &state.gradients {
        Some((gradients, gmasks)) => {
            let out = propagate_seamless(
                &state.frames,
                &state.masks,
                gradients,
                gmasks,
                flows,
                &config.propagation,
                &config.poisson,
            )?;
            state.frames = out.frames;
            state.masks = out.masks;
            state.gradients = Some((out.gradients, out.gradient_masks));
            degraded.extend(out.degraded);
        }
        None => {
            let (frames, masks) = propagate_color(&state.frames, &state.masks, flows, &config.propagation)?;
            state.frames = frames;
            state.masks = masks;
        }
    }
    Ok(())
}

/// Alternate propagation and single-image fill until every mask is empty or
/// the iteration cap is reached.
pub(crate) fn run_loop(
    state: &mut LoopState,
    flows: &FlowSet,
    filler: &dyn FrameFiller,
    config: &CompletionConfig,
    observer: &mut dyn StageObserver,
) -> Result<LoopOutcome, FlowFillError> {
    let cap = config.convergence.max_iterations;
    let mut iterations = Vec::new();
    let mut degraded = Vec::new();

    for iteration in 0..cap {
        let missing_before = count_missing(&state.masks);
        if missing_before == 0 {
            break;
        }

        propagate_once(state, flows, config, &mut degraded)?;
        let missing_after_propagation = count_missing(&state.masks);
        debug_assert!(missing_after_propagation <= missing_before);

        let mut filled_frames = Vec::new();
        if missing_after_propagation > 0 {
            filled_frames = select_fill_frames(&state.masks, config.convergence.fill_strategy);
            fill_frames(state, &filled_frames, filler, config.convergence.fill_dilation_radius)?;
            state.refresh_gradients();
        }
        let missing_after_fill = count_missing(&state.masks);

        tracing::info!(
            iteration,
            missing_before,
            missing_after_propagation,
            missing_after_fill,
            filled = filled_frames.len(),
            "iteration"
        );
        observer.iteration(iteration, &state.frames, &state.masks);
        iterations.push(IterationReport {
            iteration,
            missing_before,
            missing_after_propagation,
            missing_after_fill,
            filled_frames,
        });
    }

    let residual = count_missing(&state.masks);
    if residual > 0 {
        tracing::warn!(
            residual,
            max_iterations = cap,
            "iteration cap reached with missing pixels, returning best effort"
        );
    }
    Ok(LoopOutcome {
        iterations,
        converged: residual == 0,
        degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_frame_picks_largest_mask_first_on_ties() {
        let mut a = Mask::new(4, 4);
        a.set(0, 0, true);
        let mut b = Mask::new(4, 4);
        b.set(0, 0, true);
        b.set(1, 0, true);
        let c = b.clone();
        let masks = vec![a, Mask::new(4, 4), b, c];
        assert_eq!(select_fill_frames(&masks, FillStrategy::KeyFrame), vec![2]);
        assert_eq!(select_fill_frames(&masks, FillStrategy::AllFrames), vec![0, 2, 3]);
        assert!(select_fill_frames(&[Mask::new(2, 2)], FillStrategy::KeyFrame).is_empty());
    }
}
