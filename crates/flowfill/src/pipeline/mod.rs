//! End-to-end video completion.
//!
//! Stages, in order:
//!
//! 1. **Flow** – forward/backward (and optional non-local) flow on the input.
//! 2. **Extend** – extrapolation mode: enlarge the canvas, pad flow.
//! 3. **Trust masks** – object removal: dilate/close/fill the raw masks.
//! 4. **Edges** – optional completed flow edges for guidance.
//! 5. **Flow completion** – repair flow inside the trust masks.
//! 6. **Converge** – PROPAGATE / FILL until every mask is empty.

mod converge;

use imageproc::distance_transform::Norm;
use rayon::prelude::*;

use crate::complete::complete_flow;
use crate::config::{CompletionConfig, CompletionMode};
use crate::edges::{complete_flow_edges, EdgeCompleter, ObservedEdges};
use crate::error::{DegradedEvent, FlowFillError};
use crate::extend::extend_view;
use crate::flow::{compute_flows, FlowEstimator, FlowSet, HornSchunck, NonLocalFlows};
use crate::inpaint::{FrameFiller, TeleaFiller};
use crate::morphology::{dilate, fill_holes, trust_mask};
use crate::result::{CompletionOutput, CompletionReport};
use crate::volume::{count_missing, validate_shapes, Frame, Mask};

use converge::{run_loop, LoopState};

/// Which flow a [`StageObserver::flows`] call carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    /// As estimated, before any canvas change.
    Raw,
    /// After completion inside the trust masks.
    Completed,
}

/// Hooks for intermediate artifacts. All methods default to no-ops.
pub trait StageObserver {
    fn flows(&mut self, _stage: FlowStage, _flows: &FlowSet) {}

    /// Called after every loop iteration with the current frames and masks.
    fn iteration(&mut self, _iteration: usize, _frames: &[Frame], _masks: &[Mask]) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl StageObserver for NoopObserver {}

// ── Memory budget ──────────────────────────────────────────────────────────

/// Bytes needed to hold every volume of a run at once.
///
/// Counts the working frames and their propagation snapshot, all flow
/// fields (three per frame and direction for non-local flow), gradient
/// volumes in seamless mode, and the raw plus trust masks.
pub fn estimate_footprint(width: u32, height: u32, n_frames: usize, config: &CompletionConfig) -> u64 {
    let px = width as u64 * height as u64;
    let n = n_frames as u64;
    let f32_bytes = 4u64;

    let color = 2 * n * px * 3 * f32_bytes;
    let local_flow = 2 * n.saturating_sub(1) * px * 2 * f32_bytes;
    let nonlocal_flow = if config.nonlocal {
        2 * 3 * n * px * 2 * f32_bytes
    } else {
        0
    };
    let gradients = if config.seamless {
        2 * n * px * 6 * f32_bytes + n * px
    } else {
        0
    };
    let masks = 2 * n * px;
    // completion keeps raw and completed flow side by side
    color + 2 * (local_flow + nonlocal_flow) + gradients + masks
}

// ── Completer ──────────────────────────────────────────────────────────────

/// Color masks and flow trust masks for object removal.
///
/// Trust masks always come from the user masks; the seamless dilation only
/// widens the region whose color and gradients are rebuilt.
fn removal_masks(raw: Vec<Mask>, cfg: &CompletionConfig) -> (Vec<Mask>, Vec<Mask>) {
    let trust: Vec<Mask> = raw.par_iter().map(|m| trust_mask(m, &cfg.trust_mask)).collect();
    let masks = if cfg.seamless {
        raw.par_iter()
            .map(|m| fill_holes(&dilate(m, Norm::L1, cfg.seamless_mask_dilation)))
            .collect()
    } else {
        raw
    };
    (masks, trust)
}

/// Flow-guided video completion with pluggable capabilities.
///
/// Defaults to the built-in [`HornSchunck`] estimator, [`TeleaFiller`] and
/// [`ObservedEdges`].
pub struct VideoCompleter {
    config: CompletionConfig,
    estimator: Box<dyn FlowEstimator>,
    filler: Box<dyn FrameFiller>,
    edge_completer: Box<dyn EdgeCompleter>,
}

impl VideoCompleter {
    pub fn new(config: CompletionConfig) -> Self {
        Self {
            config,
            estimator: Box::new(HornSchunck::default()),
            filler: Box::new(TeleaFiller::default()),
            edge_completer: Box::new(ObservedEdges),
        }
    }

    pub fn with_flow_estimator(mut self, estimator: impl FlowEstimator + 'static) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    pub fn with_frame_filler(mut self, filler: impl FrameFiller + 'static) -> Self {
        self.filler = Box::new(filler);
        self
    }

    pub fn with_edge_completer(mut self, completer: impl EdgeCompleter + 'static) -> Self {
        self.edge_completer = Box::new(completer);
        self
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    /// Complete a video.
    ///
    /// `masks` (one per frame, `true` = remove) are required for object
    /// removal and ignored for extrapolation.
    pub fn run(&self, frames: Vec<Frame>, masks: Option<Vec<Mask>>) -> Result<CompletionOutput, FlowFillError> {
        self.run_observed(frames, masks, &mut NoopObserver)
    }

    /// [`run`](Self::run) with intermediate artifacts reported to `observer`.
    pub fn run_observed(
        &self,
        frames: Vec<Frame>,
        masks: Option<Vec<Mask>>,
        observer: &mut dyn StageObserver,
    ) -> Result<CompletionOutput, FlowFillError> {
        let cfg = &self.config;
        let n = frames.len();

        // ── Preconditions ──
        let masks = match cfg.mode {
            CompletionMode::ObjectRemoval => {
                let masks = masks.ok_or(FlowFillError::MissingMasks)?;
                validate_shapes(&frames, Some(&masks))?;
                Some(masks)
            }
            CompletionMode::VideoExtrapolation => {
                cfg.extrapolation.validate()?;
                validate_shapes(&frames, None)?;
                if masks.is_some() {
                    tracing::debug!("masks are ignored in extrapolation mode");
                }
                None
            }
        };
        let (in_w, in_h) = frames[0].dimensions();
        let (work_w, work_h) = match cfg.mode {
            CompletionMode::ObjectRemoval => (in_w, in_h),
            CompletionMode::VideoExtrapolation => (
                (cfg.extrapolation.w_scale * in_w as f64).floor() as u32,
                (cfg.extrapolation.h_scale * in_h as f64).floor() as u32,
            ),
        };
        let footprint = estimate_footprint(work_w, work_h, n, cfg);
        if let Some(budget) = cfg.max_memory_bytes {
            if footprint > budget {
                return Err(FlowFillError::MemoryBudget {
                    required: footprint,
                    budget,
                });
            }
        }
        tracing::info!(
            mode = %cfg.mode,
            frames = n,
            width = in_w,
            height = in_h,
            seamless = cfg.seamless,
            edge_guide = cfg.edge_guide,
            nonlocal = cfg.nonlocal,
            footprint,
            "starting completion"
        );

        // ── Flow ──
        let computed = compute_flows(&frames, self.estimator.as_ref(), cfg.nonlocal, &cfg.homography)?;
        let mut degraded: Vec<DegradedEvent> = computed.degraded;
        observer.flows(FlowStage::Raw, &computed.flows);

        // ── Canvas and masks ──
        let (frames, masks, trust, flows) = match masks {
            Some(raw) => {
                let (masks, trust) = removal_masks(raw, cfg);
                (frames, masks, trust, computed.flows)
            }
            None => {
                let view = extend_view(&frames, &computed.flows, &cfg.extrapolation)?;
                let trust = view.masks.clone();
                (view.frames, view.masks, trust, view.flows)
            }
        };
        let initial_missing = count_missing(&masks);

        // ── Flow completion ──
        let flows = self.complete_flows(flows, &trust, &mut degraded)?;
        observer.flows(FlowStage::Completed, &flows);

        // ── Converge ──
        let mut state = LoopState::new(frames, masks, cfg.seamless);
        let outcome = run_loop(&mut state, &flows, self.filler.as_ref(), cfg, observer)?;
        degraded.extend(outcome.degraded);

        let (out_w, out_h) = state.frames[0].dimensions();
        let report = CompletionReport {
            mode: cfg.mode,
            seamless: cfg.seamless,
            edge_guide: cfg.edge_guide,
            nonlocal: cfg.nonlocal,
            n_frames: n,
            input_size: [in_w, in_h],
            output_size: [out_w, out_h],
            estimated_memory_bytes: footprint,
            initial_missing,
            residual_missing: count_missing(&state.masks),
            iterations: outcome.iterations,
            converged: outcome.converged,
            degraded,
        };
        tracing::info!(
            iterations = report.iterations.len(),
            converged = report.converged,
            degraded = report.degraded.len(),
            "completion finished"
        );
        Ok(CompletionOutput {
            frames: state.frames,
            masks: state.masks,
            report,
        })
    }

    fn complete_flows(
        &self,
        flows: FlowSet,
        trust: &[Mask],
        degraded: &mut Vec<DegradedEvent>,
    ) -> Result<FlowSet, FlowFillError> {
        let cfg = &self.config;
        let (edges_fwd, edges_bwd) = if cfg.edge_guide {
            (
                Some(complete_flow_edges(&flows.forward, trust, self.edge_completer.as_ref())?),
                Some(complete_flow_edges(&flows.backward, trust, self.edge_completer.as_ref())?),
            )
        } else {
            (None, None)
        };

        let (forward, ev) = complete_flow(&flows.forward, trust, edges_fwd.as_deref(), &cfg.poisson)?;
        degraded.extend(ev);
        let (backward, ev) = complete_flow(&flows.backward, trust, edges_bwd.as_deref(), &cfg.poisson)?;
        degraded.extend(ev);
        let nonlocal = match &flows.nonlocal {
            Some(nl) => {
                let (fwd, ev) = complete_flow(&nl.forward, trust, None, &cfg.poisson)?;
                degraded.extend(ev);
                let (bwd, ev) = complete_flow(&nl.backward, trust, None, &cfg.poisson)?;
                degraded.extend(ev);
                Some(NonLocalFlows {
                    forward: fwd,
                    backward: bwd,
                })
            }
            None => None,
        };
        tracing::info!(edge_guided = cfg.edge_guide, "flow completed");
        Ok(FlowSet {
            forward,
            backward,
            nonlocal,
        })
    }
}
