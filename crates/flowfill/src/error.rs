//! Error taxonomy for the completion pipeline.
//!
//! Fatal conditions surface as [`FlowFillError`]. Numerically unstable steps
//! (homography fitting, Poisson solves) return [`DegradedReason`] instead; the
//! caller always holds a cheap fallback and records the event in the report.

use crate::direction::Direction;

/// Boxed error returned by an external capability (flow estimator, frame
/// filler, edge completer).
pub type CapabilityError = Box<dyn std::error::Error + Send + Sync>;

// ── Fatal errors ───────────────────────────────────────────────────────────

/// Fatal pipeline error.
#[derive(Debug, thiserror::Error)]
pub enum FlowFillError {
    /// Mode string is neither `object_removal` nor `video_extrapolation`.
    #[error("unsupported completion mode '{0}' (accepted: object_removal, video_extrapolation)")]
    UnsupportedMode(String),

    /// Edge-guided completion was requested for a non-local flow volume.
    #[error("edge-guided completion is not supported for {0} flow")]
    EdgeGuidanceUnsupported(Direction),

    /// Two volumes that must be frame-aligned disagree in shape.
    #[error("shape mismatch in {what}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Which volume pair was compared.
        what: &'static str,
        /// Expected `[width, height, count]`.
        expected: [usize; 3],
        /// Observed `[width, height, count]`.
        got: [usize; 3],
    },

    /// Flow needs at least two frames.
    #[error("at least 2 frames are required, got {0}")]
    TooFewFrames(usize),

    /// Object removal was requested without per-frame masks.
    #[error("object removal requires one mask per frame")]
    MissingMasks,

    /// Extrapolation scale factors must be >= 1 with at least one > 1.
    #[error("invalid extrapolation scale h={h_scale}, w={w_scale}")]
    InvalidScale {
        /// Vertical scale factor.
        h_scale: f64,
        /// Horizontal scale factor.
        w_scale: f64,
    },

    /// Estimated volume footprint exceeds the configured budget.
    #[error("memory budget exceeded: need {required} bytes, budget is {budget} bytes")]
    MemoryBudget {
        /// Estimated bytes for all volumes held at once.
        required: u64,
        /// Configured cap.
        budget: u64,
    },

    /// An external capability failed.
    #[error("{stage} failed: {source}")]
    Capability {
        /// Pipeline stage that invoked the capability.
        stage: &'static str,
        /// Underlying capability error.
        #[source]
        source: CapabilityError,
    },
}

impl FlowFillError {
    pub(crate) fn capability(stage: &'static str, source: CapabilityError) -> Self {
        Self::Capability { stage, source }
    }
}

// ── Degraded-quality fallbacks ─────────────────────────────────────────────

/// Reason a numerically unstable step fell back to its cheap alternative.
#[derive(Debug, Clone, PartialEq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum DegradedReason {
    /// Fewer point correspondences than a homography needs.
    #[error("too few correspondences: need {needed}, got {got}")]
    TooFewCorrespondences {
        /// Minimum required.
        needed: usize,
        /// Available.
        got: usize,
    },
    /// RANSAC could not find a consensus set.
    #[error("insufficient inliers: need {needed}, found {found}")]
    InsufficientInliers {
        /// Minimum required.
        needed: usize,
        /// Best consensus size found.
        found: usize,
    },
    /// A matrix was singular or not invertible.
    #[error("singular matrix: {0}")]
    Singular(String),
    /// Iterative solver did not reach its tolerance.
    #[error("solver did not converge after {iters} iterations (residual {residual:.3e})")]
    NotConverged {
        /// Iterations performed.
        iters: usize,
        /// Final relative residual.
        residual: f64,
    },
    /// NaN or infinity appeared in a result.
    #[error("non-finite values in result")]
    NonFinite,
    /// Unknown region has no known boundary value to anchor the solve.
    #[error("{0} unknown pixels have no known boundary")]
    Unanchored(usize),
}

/// A recorded degraded-quality fallback.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DegradedEvent {
    /// Stage in which the fallback happened.
    pub stage: String,
    /// Frame (or frame pair) index.
    pub frame: usize,
    /// Why the fallback was taken.
    pub reason: DegradedReason,
}

impl DegradedEvent {
    pub(crate) fn new(stage: impl Into<String>, frame: usize, reason: DegradedReason) -> Self {
        Self {
            stage: stage.into(),
            frame,
            reason,
        }
    }
}
