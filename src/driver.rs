//! Estimation loop driver
//!
//! Runs the per-step state machine around the opaque estimator: build a
//! frame graph, initialize the pose/disparity state with the leading frames
//! anchored to ground truth, then refine through a random number of restart
//! rounds. Each round scores the estimator's iterates with all three losses,
//! triggers one backward pass, and carries the final iterate forward as a
//! detached copy.

use crate::data::{Metrics, Sample};
use crate::depth::{DisparityBatch, WORKING_STRIDE};
use crate::estimator::{EstimatorInput, EstimatorOutput, PoseDepthEstimator};
use crate::frame_graph::{FrameGraph, GraphError, GraphPolicy};
use crate::losses::{flow_loss, geodesic_loss, residual_loss, LossWeights};
use crate::pose_batch::PoseBatch;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Shape of the probabilistic restart loop
///
/// The two variants differ in when the continue/stop gate is drawn relative
/// to the round it controls, which changes the boundary behavior:
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    /// The gate starts at 0 and each round redraws it first. At least one
    /// round runs whenever `restart_prob > 0`; zero rounds run when
    /// `restart_prob == 0`.
    RedrawInsideRound,
    /// The gate is drawn before the first round, so zero rounds are possible
    /// for any `restart_prob < 1`.
    DrawBeforeRound,
}

/// Driver configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    /// Internal estimator iterations per round
    pub iterations: usize,
    /// Leading frames held at ground truth (gauge anchors)
    pub fixed_frames: usize,
    /// Probability of continuing with another restart round
    pub restart_prob: f64,
    /// When the continue/stop gate is drawn
    pub restart_policy: RestartPolicy,
    /// Hard cap on rounds per step, so thresholds near 1.0 cannot stall a
    /// worker at the synchronization barrier
    pub max_rounds: usize,
    /// Directed edge budget for the co-visibility graph
    pub edge_budget: usize,
    /// Radius of the fixed local-window graph
    pub window_radius: usize,
    /// Discount applied to earlier estimator iterates in every loss
    pub gamma: f64,
    /// Fit away a global translation scale in the geodesic loss
    pub normalize_scale: bool,
    /// Loss combination weights
    pub weights: LossWeights,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            iterations: 15,
            fixed_frames: 2,
            restart_prob: 0.2,
            restart_policy: RestartPolicy::RedrawInsideRound,
            max_rounds: 64,
            edge_budget: 24,
            window_radius: 2,
            gamma: 0.9,
            normalize_scale: false,
            weights: LossWeights::default(),
        }
    }
}

/// The pose/disparity estimate carried across restart rounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationState {
    /// Current world-to-camera pose estimate
    pub poses: PoseBatch,
    /// Current inverse-depth estimate at the working resolution
    pub disparity: DisparityBatch,
}

impl EstimationState {
    /// Initial state for a step: frame 0 takes its ground-truth pose, every
    /// other frame starts from ground-truth frame 1, and disparity is a
    /// uniform 1.0 at the working resolution
    pub fn initialize(gt_poses: &PoseBatch, rows: usize, cols: usize) -> Self {
        let n = gt_poses.len();
        let anchor = if n > 1 { gt_poses[1] } else { gt_poses[0] };

        let mut poses = PoseBatch::broadcast(anchor, n);
        poses[0] = gt_poses[0];

        Self {
            poses,
            disparity: DisparityBatch::constant(n, rows, cols, 1.0),
        }
    }

    /// Next-round state from a round's final iterate
    ///
    /// The carried values are plain copies with no backward dependency on
    /// the round that produced them. Fixed frames are re-pinned to ground
    /// truth, rotations renormalized, and disparities clamped non-negative.
    /// Returns `None` when the round produced no iterates.
    pub fn from_round_output(
        output: &EstimatorOutput,
        gt_poses: &PoseBatch,
        fixed_frames: usize,
    ) -> Option<Self> {
        let mut poses = output.poses.last()?.clone();
        let mut disparity = output.disparities.last()?.clone();

        for frame in 0..fixed_frames.min(poses.len()) {
            poses[frame] = gt_poses[frame];
        }
        poses.renormalize();
        disparity.clamp_non_negative();

        Some(Self { poses, disparity })
    }
}

/// Why a step was abandoned without a gradient update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// NaN or Inf in a pose or disparity iterate
    NonFiniteEstimate,
}

/// Whether the step contributed gradients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Abandoned(AbandonReason),
}

/// Per-term losses from the last executed round
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LossBreakdown {
    pub total: f64,
    pub geodesic: f64,
    pub residual: f64,
    pub flow: f64,
}

/// Everything the orchestrator needs to know about one training step
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// Estimation rounds actually executed
    pub rounds: usize,
    /// Graph policy drawn for this step
    pub graph_policy: GraphPolicy,
    pub outcome: StepOutcome,
    /// Losses of the last executed round (zero when no round ran)
    pub loss: LossBreakdown,
    /// Diagnostics of the last clean round
    pub metrics: Metrics,
}

/// Run one full training step around the injected estimator
///
/// Draws the graph policy and restart gates from `rng`, so a fixed seed
/// reproduces the step exactly. A non-finite estimate abandons the step
/// (reported, no backward call) instead of corrupting the model.
pub fn run_training_step<E: PoseDepthEstimator, R: Rng>(
    estimator: &mut E,
    sample: &Sample,
    config: &SolverConfig,
    rng: &mut R,
) -> Result<StepReport, GraphError> {
    let n = sample.num_frames();
    if n < 2 {
        return Err(GraphError::TooFewFrames(n));
    }

    let graph_policy = GraphPolicy::draw(rng);
    let working_disps = sample.disparities.to_working_resolution();
    let working_intrinsics = sample.intrinsics.scaled(1.0 / WORKING_STRIDE as f64);

    let graph = match graph_policy {
        GraphPolicy::Covisibility => FrameGraph::covisibility(
            &sample.poses,
            &working_disps,
            &working_intrinsics,
            config.edge_budget,
        )?,
        GraphPolicy::LocalWindow => FrameGraph::local_window(n, config.window_radius)?,
    };

    let rows = working_disps.get(0).rows();
    let cols = working_disps.get(0).cols();
    let mut state = EstimationState::initialize(&sample.poses, rows, cols);

    let mut rounds = 0usize;
    let mut loss = LossBreakdown::default();
    let mut metrics = Metrics::new();

    let mut gate = match config.restart_policy {
        RestartPolicy::RedrawInsideRound => 0.0,
        RestartPolicy::DrawBeforeRound => rng.gen::<f64>(),
    };

    while gate < config.restart_prob && rounds < config.max_rounds {
        if config.restart_policy == RestartPolicy::RedrawInsideRound {
            gate = rng.gen::<f64>();
        }

        let output = estimator.estimate(&EstimatorInput {
            poses: &state.poses,
            images: &sample.images,
            disparity: &state.disparity,
            intrinsics: &working_intrinsics,
            graph: &graph,
            iterations: config.iterations,
            fixed_frames: config.fixed_frames,
        });
        rounds += 1;

        if !output.is_finite() {
            warn!(round = rounds, "non-finite pose/disparity estimate, abandoning step");
            return Ok(StepReport {
                rounds,
                graph_policy,
                outcome: StepOutcome::Abandoned(AbandonReason::NonFiniteEstimate),
                loss: LossBreakdown::default(),
                metrics,
            });
        }

        let (geodesic, geo_metrics) = geodesic_loss(
            &sample.poses,
            &output.poses,
            &graph,
            config.gamma,
            config.normalize_scale,
        );
        let (residual, res_metrics) = residual_loss(&output.residuals, config.gamma);
        let (flow, flow_metrics) = flow_loss(
            &sample.poses,
            &sample.disparities,
            &output.poses,
            &output.disparities,
            &sample.intrinsics,
            &graph,
            config.gamma,
        );

        let total = config.weights.combine(geodesic, residual, flow);
        estimator.backward(total);

        loss = LossBreakdown {
            total,
            geodesic,
            residual,
            flow,
        };
        metrics = geo_metrics;
        metrics.extend(res_metrics);
        metrics.extend(flow_metrics);

        if let Some(next) = EstimationState::from_round_output(&output, &sample.poses, config.fixed_frames) {
            state = next;
        }

        if config.restart_policy == RestartPolicy::DrawBeforeRound {
            gate = rng.gen::<f64>();
        }
    }

    debug!(rounds, policy = ?graph_policy, total = loss.total, "training step done");

    Ok(StepReport {
        rounds,
        graph_policy,
        outcome: StepOutcome::Completed,
        loss,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{stationary_sample, synthetic_sample, OracleEstimator};
    use approx::assert_abs_diff_eq;
    use nalgebra::DVector;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_initial_state_anchors_leading_frames() {
        let sample = synthetic_sample(7, 48, 64, 11);
        let state = EstimationState::initialize(&sample.poses, 6, 8);

        // Frame 0 exactly at ground truth
        assert_abs_diff_eq!(
            state.poses[0].translation,
            sample.poses[0].translation,
            epsilon = 1e-15
        );
        // Every later frame starts from ground-truth frame 1
        for frame in 1..7 {
            assert_abs_diff_eq!(
                state.poses[frame].translation,
                sample.poses[1].translation,
                epsilon = 1e-15
            );
            assert_abs_diff_eq!(
                state.poses[frame].rotation.quat.coords,
                sample.poses[1].rotation.quat.coords,
                epsilon = 1e-15
            );
        }
        // Uniform unit disparity
        for map in state.disparity.iter() {
            assert_eq!(map.rows(), 6);
            assert_eq!(map.cols(), 8);
            assert_abs_diff_eq!(map.get(3, 4), 1.0);
        }
    }

    #[test]
    fn test_round_output_pins_fixed_frames_and_clamps() {
        let sample = synthetic_sample(4, 48, 64, 3);
        let mut drifted = sample.poses.clone();
        for frame in 0..4 {
            drifted[frame].translation.x += 1.0;
        }
        let mut disparity = sample.disparities.to_working_resolution();
        disparity.get_mut(2).set(0, 0, -0.5);

        let output = EstimatorOutput {
            poses: vec![drifted],
            disparities: vec![disparity],
            residuals: vec![DVector::zeros(4)],
        };

        let state = EstimationState::from_round_output(&output, &sample.poses, 2).unwrap();

        // Fixed frames snap back to ground truth, the rest keep the drift
        assert_abs_diff_eq!(
            state.poses[0].translation,
            sample.poses[0].translation,
            epsilon = 1e-15
        );
        assert_abs_diff_eq!(
            state.poses[1].translation,
            sample.poses[1].translation,
            epsilon = 1e-15
        );
        assert_abs_diff_eq!(
            state.poses[2].translation.x,
            sample.poses[2].translation.x + 1.0,
            epsilon = 1e-12
        );
        // Negative disparity clamped away
        assert_abs_diff_eq!(state.disparity.get(2).get(0, 0), 0.0);
    }

    #[test]
    fn test_restart_count_is_reproducible() {
        let sample = stationary_sample(7, 48, 64);
        let config = SolverConfig {
            restart_prob: 0.6,
            ..SolverConfig::default()
        };

        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let mut estimator = OracleEstimator::for_sample(&sample);
        let report = run_training_step(&mut estimator, &sample, &config, &mut rng).unwrap();

        // Replay the same draw sequence: one draw for the graph policy, then
        // one per round until a draw clears the threshold.
        let mut replay = ChaCha8Rng::seed_from_u64(21);
        let _policy = replay.gen::<f64>();
        let mut gate = 0.0;
        let mut expected = 0usize;
        while gate < config.restart_prob && expected < config.max_rounds {
            gate = replay.gen::<f64>();
            expected += 1;
        }

        assert_eq!(report.rounds, expected);
        assert!(report.rounds >= 1);
        assert_eq!(estimator.backward_losses.len(), report.rounds);
    }

    #[test]
    fn test_zero_restart_probability_runs_zero_rounds() {
        let sample = stationary_sample(5, 48, 64);
        let mut estimator = OracleEstimator::for_sample(&sample);

        for policy in [RestartPolicy::RedrawInsideRound, RestartPolicy::DrawBeforeRound] {
            let config = SolverConfig {
                restart_prob: 0.0,
                restart_policy: policy,
                ..SolverConfig::default()
            };
            let mut rng = ChaCha8Rng::seed_from_u64(5);
            let report = run_training_step(&mut estimator, &sample, &config, &mut rng).unwrap();

            assert_eq!(report.rounds, 0);
            assert_eq!(report.outcome, StepOutcome::Completed);
            assert_abs_diff_eq!(report.loss.total, 0.0);
        }
        assert!(estimator.backward_losses.is_empty());
    }

    #[test]
    fn test_redraw_policy_guarantees_a_round_for_positive_prob() {
        let sample = stationary_sample(5, 48, 64);
        let config = SolverConfig {
            restart_prob: 1e-9,
            ..SolverConfig::default()
        };

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut estimator = OracleEstimator::for_sample(&sample);
        let report = run_training_step(&mut estimator, &sample, &config, &mut rng).unwrap();

        assert_eq!(report.rounds, 1);
    }

    #[test]
    fn test_max_rounds_caps_runaway_threshold() {
        let sample = stationary_sample(5, 48, 64);
        let config = SolverConfig {
            restart_prob: 1.0,
            max_rounds: 5,
            ..SolverConfig::default()
        };

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut estimator = OracleEstimator::for_sample(&sample);
        let report = run_training_step(&mut estimator, &sample, &config, &mut rng).unwrap();

        assert_eq!(report.rounds, 5);
        assert_eq!(report.outcome, StepOutcome::Completed);
    }

    /// Estimator that emits a NaN pose on its first round
    struct PoisonEstimator {
        inner: OracleEstimator,
        backward_calls: usize,
    }

    impl PoseDepthEstimator for PoisonEstimator {
        fn estimate(&mut self, input: &EstimatorInput<'_>) -> EstimatorOutput {
            let mut output = self.inner.estimate(input);
            if let Some(last) = output.poses.last_mut() {
                last[2].translation.x = f64::NAN;
            }
            output
        }

        fn backward(&mut self, _loss: f64) {
            self.backward_calls += 1;
        }
    }

    #[test]
    fn test_non_finite_estimate_abandons_step_without_backward() {
        let sample = stationary_sample(5, 48, 64);
        let config = SolverConfig {
            restart_prob: 0.9,
            ..SolverConfig::default()
        };

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut estimator = PoisonEstimator {
            inner: OracleEstimator::for_sample(&sample),
            backward_calls: 0,
        };
        let report = run_training_step(&mut estimator, &sample, &config, &mut rng).unwrap();

        assert_eq!(
            report.outcome,
            StepOutcome::Abandoned(AbandonReason::NonFiniteEstimate)
        );
        assert_eq!(report.rounds, 1);
        assert_eq!(estimator.backward_calls, 0);
        assert_abs_diff_eq!(report.loss.total, 0.0);
    }

    #[test]
    fn test_too_few_frames_is_fatal() {
        let sample = stationary_sample(1, 48, 64);
        let mut estimator = OracleEstimator::for_sample(&sample);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let result = run_training_step(&mut estimator, &sample, &SolverConfig::default(), &mut rng);
        assert_eq!(result, Err(GraphError::TooFewFrames(1)));
    }

    #[test]
    fn test_end_to_end_stationary_scene_has_near_zero_loss() {
        // Seven identical frames: the trivial initialization already matches
        // ground truth, and the oracle keeps it there, so every loss term
        // must vanish after the first round.
        let sample = stationary_sample(7, 48, 64);
        let config = SolverConfig {
            restart_prob: 0.6,
            ..SolverConfig::default()
        };

        let mut rng = ChaCha8Rng::seed_from_u64(123);
        let mut estimator = OracleEstimator::for_sample(&sample);
        let report = run_training_step(&mut estimator, &sample, &config, &mut rng).unwrap();

        assert_eq!(report.outcome, StepOutcome::Completed);
        assert!(report.rounds >= 1);
        assert_abs_diff_eq!(report.loss.geodesic, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(report.loss.residual, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(report.loss.flow, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(report.loss.total, 0.0, epsilon = 1e-8);
        assert_abs_diff_eq!(report.metrics["rot_error"], 0.0, epsilon = 1e-9);
        for loss in &estimator.backward_losses {
            assert_abs_diff_eq!(*loss, 0.0, epsilon = 1e-8);
        }
    }
}
