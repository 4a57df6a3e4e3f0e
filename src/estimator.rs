//! Opaque pose/depth estimator interface
//!
//! The learned regressor that actually refines poses and disparities is a
//! trained model, not an algorithm this crate reimplements. It sits behind
//! [`PoseDepthEstimator`]: the driver hands it the current state plus the
//! frame graph, and receives back the per-iteration estimate sequences and
//! the internal residuals those iterations produced.

use crate::camera::Intrinsics;
use crate::data::ImageBatch;
use crate::depth::DisparityBatch;
use crate::frame_graph::FrameGraph;
use crate::pose_batch::PoseBatch;
use nalgebra::DVector;

/// Everything the estimator sees for one refinement round
pub struct EstimatorInput<'a> {
    /// Current pose estimate (world-to-camera)
    pub poses: &'a PoseBatch,
    /// Input images, full resolution
    pub images: &'a ImageBatch,
    /// Current inverse-depth estimate at the working resolution
    pub disparity: &'a DisparityBatch,
    /// Intrinsics scaled to the working resolution
    pub intrinsics: &'a Intrinsics,
    /// Frame pairs to jointly refine
    pub graph: &'a FrameGraph,
    /// Number of internal refinement iterations to run
    pub iterations: usize,
    /// Leading frames whose poses must not be updated (gauge anchors)
    pub fixed_frames: usize,
}

/// Per-iteration outputs of one refinement round
///
/// `poses[k]` and `disparities[k]` are the estimates after internal
/// iteration `k`; disparities stay at the working resolution. `residuals[k]`
/// is whatever per-edge error signal the estimator produced internally at
/// that iteration, consumed only by the residual loss.
pub struct EstimatorOutput {
    pub poses: Vec<PoseBatch>,
    pub disparities: Vec<DisparityBatch>,
    pub residuals: Vec<DVector<f64>>,
}

impl EstimatorOutput {
    /// True when every pose and disparity iterate is finite
    pub fn is_finite(&self) -> bool {
        self.poses.iter().all(PoseBatch::is_finite)
            && self.disparities.iter().all(DisparityBatch::is_finite)
    }
}

/// The injected learned estimator
pub trait PoseDepthEstimator {
    /// Run one refinement round over the given state and graph
    fn estimate(&mut self, input: &EstimatorInput<'_>) -> EstimatorOutput;

    /// Accumulate gradients for the round's combined loss
    ///
    /// Called exactly once per refinement round. Parameter updates and
    /// gradient synchronization happen outside this crate.
    fn backward(&mut self, loss: f64) {
        let _ = loss;
    }
}
