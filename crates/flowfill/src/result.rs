//! Output of a completion run.

use serde::{Deserialize, Serialize};

use crate::config::CompletionMode;
use crate::error::DegradedEvent;
use crate::volume::{Frame, Mask};

/// Missing-pixel bookkeeping for one PROPAGATE / FILL iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationReport {
    /// Zero-based iteration index.
    pub iteration: usize,
    pub missing_before: usize,
    pub missing_after_propagation: usize,
    /// Equal to `missing_after_propagation` when no FILL step ran.
    pub missing_after_fill: usize,
    /// Frames handed to the single-image filler.
    pub filled_frames: Vec<usize>,
}

/// Summary of a completion run, serializable as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReport {
    pub mode: CompletionMode,
    pub seamless: bool,
    pub edge_guide: bool,
    pub nonlocal: bool,
    pub n_frames: usize,
    /// `[width, height]` of the input frames.
    pub input_size: [u32; 2],
    /// `[width, height]` of the output frames (enlarged in extrapolation).
    pub output_size: [u32; 2],
    /// Estimated peak footprint of the volumes, in bytes.
    pub estimated_memory_bytes: u64,
    /// Missing pixels before the first propagation.
    pub initial_missing: usize,
    pub iterations: Vec<IterationReport>,
    /// `true` when every mask emptied within the iteration cap.
    pub converged: bool,
    /// Pixels still unknown at the end (0 when converged).
    pub residual_missing: usize,
    /// Degraded-quality fallbacks taken during the run.
    pub degraded: Vec<DegradedEvent>,
}

/// Completed frames, their final masks, and the run report.
#[derive(Debug, Clone)]
pub struct CompletionOutput {
    pub frames: Vec<Frame>,
    /// Final masks; all empty when `report.converged`.
    pub masks: Vec<Mask>,
    pub report: CompletionReport,
}
