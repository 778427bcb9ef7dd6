//! Pipeline configuration.
//!
//! Every group has a `Default` matching the values the pipeline was tuned
//! with; all groups round-trip through serde so a run can be reproduced from
//! a JSON file.

use serde::{Deserialize, Serialize};

use crate::error::FlowFillError;
use crate::flow::homography::AlignmentRansac;

/// What the run is completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Remove the masked region of every frame.
    #[default]
    ObjectRemoval,
    /// Enlarge the canvas and synthesize the new border.
    VideoExtrapolation,
}

impl CompletionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ObjectRemoval => "object_removal",
            Self::VideoExtrapolation => "video_extrapolation",
        }
    }
}

impl std::str::FromStr for CompletionMode {
    type Err = FlowFillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "object_removal" => Ok(Self::ObjectRemoval),
            "video_extrapolation" => Ok(Self::VideoExtrapolation),
            other => Err(FlowFillError::UnsupportedMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for CompletionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canvas enlargement for [`CompletionMode::VideoExtrapolation`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtrapolationScale {
    /// Vertical scale factor (>= 1).
    pub h_scale: f64,
    /// Horizontal scale factor (>= 1).
    pub w_scale: f64,
}

impl Default for ExtrapolationScale {
    fn default() -> Self {
        Self {
            h_scale: 2.0,
            w_scale: 2.0,
        }
    }
}

impl ExtrapolationScale {
    /// Reject factors below 1 or an identity enlargement.
    pub fn validate(&self) -> Result<(), FlowFillError> {
        let ok = self.h_scale.is_finite()
            && self.w_scale.is_finite()
            && self.h_scale >= 1.0
            && self.w_scale >= 1.0
            && (self.h_scale > 1.0 || self.w_scale > 1.0);
        if ok {
            Ok(())
        } else {
            Err(FlowFillError::InvalidScale {
                h_scale: self.h_scale,
                w_scale: self.w_scale,
            })
        }
    }
}

/// Morphology that turns a raw object mask into a flow trust mask.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustMaskConfig {
    /// Cross-shaped (L1) dilation radius in pixels.
    pub dilation_radius: u8,
    /// Square (L∞) closing radius; a 21×21 kernel is radius 10.
    pub closing_radius: u8,
}

impl Default for TrustMaskConfig {
    fn default() -> Self {
        Self {
            dilation_radius: 15,
            closing_radius: 10,
        }
    }
}

/// Flow-guided propagation controls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Maximum accumulated forward/backward consistency error (pixels) along
    /// a flow chain. `None` disables the check.
    pub consistency_threshold: Option<f32>,
    /// Optional cap on the number of hops per local chain.
    pub max_trace_steps: Option<usize>,
}

/// Homography compensation for non-local flow pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomographyConfig {
    /// Align non-local pairs before estimating flow.
    pub enable: bool,
    /// FAST-9 corner threshold on 8-bit intensity.
    pub fast_threshold: u8,
    /// Keep at most this many strongest corners per frame.
    pub max_features: usize,
    /// Half-size of the square descriptor patch.
    pub patch_radius: u32,
    /// Lowe ratio-test threshold.
    pub ratio: f32,
    /// RANSAC settings for the fit.
    pub ransac: AlignmentRansac,
}

impl Default for HomographyConfig {
    fn default() -> Self {
        Self {
            enable: false,
            fast_threshold: 20,
            max_features: 500,
            patch_radius: 5,
            ratio: 0.75,
            ransac: AlignmentRansac {
                iterations: 2000,
                inlier_px: 4.0,
                min_inliers: 4,
                seed: 0,
            },
        }
    }
}

/// Sparse Poisson / Laplace solver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoissonConfig {
    /// Conjugate-gradient iteration cap (per channel).
    pub max_iters: usize,
    /// Relative residual `|r| / |b|` at which the solve is accepted.
    pub tolerance: f64,
    /// Weight of links touching a completed edge pixel (1.0 disables guidance).
    pub edge_link_weight: f32,
}

impl Default for PoissonConfig {
    fn default() -> Self {
        Self {
            max_iters: 20_000,
            tolerance: 1e-6,
            edge_link_weight: 0.1,
        }
    }
}

/// Which frames the FILL step hands to the single-image generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStrategy {
    /// Every frame that still has missing pixels.
    #[default]
    AllFrames,
    /// Only the frame with the most missing pixels; the next propagation
    /// spreads its content to the others.
    KeyFrame,
}

/// PROPAGATE / FILL loop controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Iteration cap; hitting it with residual mask is a warning.
    pub max_iterations: usize,
    /// L1 dilation of the residual mask before single-image fill.
    pub fill_dilation_radius: u8,
    /// Frame selection for the FILL step.
    pub fill_strategy: FillStrategy,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            max_iterations: 32,
            fill_dilation_radius: 2,
            fill_strategy: FillStrategy::AllFrames,
        }
    }
}

/// Top-level configuration of a completion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Object removal or field-of-view extrapolation.
    pub mode: CompletionMode,
    /// Propagate gradients and reconstruct color by Poisson blending.
    pub seamless: bool,
    /// Complete forward/backward flow with edge guidance.
    pub edge_guide: bool,
    /// Also use non-local (anchor) flow.
    pub nonlocal: bool,
    /// Canvas enlargement for extrapolation mode.
    pub extrapolation: ExtrapolationScale,
    /// Raw mask → trust mask morphology.
    pub trust_mask: TrustMaskConfig,
    /// Candidate search along flow.
    pub propagation: PropagationConfig,
    /// Homography compensation for non-local pairs.
    pub homography: HomographyConfig,
    /// Poisson / Laplace solver.
    pub poisson: PoissonConfig,
    /// Convergence loop.
    pub convergence: ConvergenceConfig,
    /// Extra L1 dilation of object masks in seamless mode.
    pub seamless_mask_dilation: u8,
    /// Cap on the estimated in-memory footprint; `None` disables the check.
    pub max_memory_bytes: Option<u64>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            mode: CompletionMode::ObjectRemoval,
            seamless: false,
            edge_guide: false,
            nonlocal: false,
            extrapolation: ExtrapolationScale::default(),
            trust_mask: TrustMaskConfig::default(),
            propagation: PropagationConfig::default(),
            homography: HomographyConfig::default(),
            poisson: PoissonConfig::default(),
            convergence: ConvergenceConfig::default(),
            seamless_mask_dilation: 5,
            max_memory_bytes: Some(8 << 30),
        }
    }
}
