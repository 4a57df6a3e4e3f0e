//! Argos SLAM: the estimation core of a learned visual-SLAM training system
//!
//! This library implements the pieces of the training loop that are genuine
//! estimation machinery rather than ML plumbing: co-visibility frame-graph
//! construction, Lie-group pose algebra, the restart-driven estimation loop,
//! and the geometric/residual/flow losses. The learned pose/depth regressor
//! itself is injected behind the [`PoseDepthEstimator`] trait.

pub mod math;
pub mod camera;
pub mod depth;
pub mod pose_batch;
pub mod frame_graph;
pub mod projective;
pub mod estimator;
pub mod data;
pub mod losses;
pub mod driver;
pub mod sync;
pub mod simulation;
// Re-export key types
pub use math::{SE3, SO3, Sim3};
pub use camera::Intrinsics;
pub use depth::{DisparityBatch, DisparityMap, WORKING_OFFSET, WORKING_STRIDE};
pub use pose_batch::PoseBatch;
pub use frame_graph::{FrameGraph, GraphError, GraphPolicy};
pub use estimator::{EstimatorInput, EstimatorOutput, PoseDepthEstimator};
pub use data::{DataSource, ImageBatch, Metrics, MetricsSink, Sample};
pub use losses::{flow_loss, geodesic_loss, residual_loss, LossWeights};
pub use driver::{
    run_training_step, AbandonReason, EstimationState, LossBreakdown, RestartPolicy, SolverConfig,
    StepOutcome, StepReport,
};
pub use sync::{clip_gradient_norm, run_data_parallel, GradientBus, WorkerLink};
