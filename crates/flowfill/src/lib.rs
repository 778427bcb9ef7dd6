//! Flow-guided video completion in pure Rust.
//!
//! Fills user-masked regions of a video (object removal) or synthesizes a
//! border around an enlarged canvas (field-of-view extrapolation) by
//! following optical flow to pixels observed in other frames. The stages are:
//!
//! 1. **Flow** – forward/backward flow between neighbours, optional
//!    non-local flow to three anchor frames with homography compensation.
//! 2. **Flow completion** – Laplace / edge-guided Poisson completion of the
//!    flow inside a dilated trust mask.
//! 3. **Propagation** – trace every missing pixel along the completed flow
//!    to its nearest known counterpart; optionally in the gradient domain
//!    with Poisson reconstruction.
//! 4. **Convergence** – alternate propagation with single-image fill until
//!    every mask is empty.
//!
//! # Public API
//! - [`VideoCompleter`] and [`CompletionConfig`] as primary entry points
//! - capability traits [`FlowEstimator`], [`FrameFiller`], [`EdgeCompleter`]
//!   with built-in reference implementations
//! - flow containers, `.flo` I/O and visualization under [`flow`]
//! - the individual stages for callers that drive the pipeline themselves

pub mod complete;
pub mod config;
pub mod direction;
pub mod edges;
pub mod error;
pub mod extend;
pub mod flow;
pub mod inpaint;
pub mod morphology;
pub mod pipeline;
pub mod poisson;
pub mod propagate;
pub mod result;
pub mod volume;

#[cfg(test)]
pub(crate) mod test_utils;

pub use complete::complete_flow;
pub use config::{
    CompletionConfig, CompletionMode, ConvergenceConfig, ExtrapolationScale, FillStrategy,
    HomographyConfig, PoissonConfig, PropagationConfig, TrustMaskConfig,
};
pub use direction::Direction;
pub use edges::{EdgeCompleter, ObservedEdges};
pub use error::{CapabilityError, DegradedEvent, DegradedReason, FlowFillError};
pub use extend::{extend_view, CanvasLayout, ExtendedView};
pub use flow::{FlowEstimator, FlowField, FlowSet, FlowVolume, HornSchunck, NonLocalFlows};
pub use inpaint::{FrameFiller, TeleaFiller};
pub use pipeline::{estimate_footprint, FlowStage, NoopObserver, StageObserver, VideoCompleter};
pub use propagate::{propagate_color, propagate_seamless};
pub use result::{CompletionOutput, CompletionReport, IterationReport};
pub use volume::{Frame, Mask, Plane};
