//! Optical flow: fields, estimation, homography compensation, artifacts.

pub mod compute;
pub mod estimator;
mod features;
pub mod field;
pub mod flo;
pub mod homography;
pub mod viz;

pub use compute::{compute_flows, ComputedFlows};
pub use estimator::{FlowEstimator, HornSchunck};
pub use field::{FlowField, FlowSet, FlowVolume, NonLocalFlows};
pub use homography::{AlignmentRansac, FrameAlignment};
