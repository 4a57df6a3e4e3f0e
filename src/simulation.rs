//! Synthetic data generation and reference estimators
//!
//! Provides trajectory generators, synthetic training samples, and two
//! stand-in estimators: an oracle that returns ground truth (for exercising
//! the driver and loss plumbing) and a seeded noisy estimator (for
//! non-trivial loss values without a trained model).

use crate::camera::Intrinsics;
use crate::data::{DataSource, ImageBatch, Sample};
use crate::depth::{DisparityBatch, DisparityMap};
use crate::estimator::{EstimatorInput, EstimatorOutput, PoseDepthEstimator};
use crate::math::{SE3, SO3};
use crate::pose_batch::PoseBatch;
use nalgebra::{DMatrix, DVector, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// Trait for generating discrete camera poses (world-to-camera)
pub trait TrajectoryGenerator {
    /// Generate n camera poses
    fn generate(&self, n_frames: usize, seed: u64) -> Vec<SE3<f64>>;
}

/// Camera circling the scene origin in the XY plane, yawing with the orbit
///
/// Small angular steps give strongly overlapping consecutive views, which is
/// the regime the co-visibility builder expects.
pub struct OrbitTrajectory {
    /// Circle radius (meters)
    pub radius: f64,
    /// Angle between consecutive frames (radians)
    pub angular_step: f64,
}

impl TrajectoryGenerator for OrbitTrajectory {
    fn generate(&self, n_frames: usize, seed: u64) -> Vec<SE3<f64>> {
        let _ = seed; // deterministic path
        (0..n_frames)
            .map(|i| {
                let theta = self.angular_step * i as f64;
                let position =
                    Vector3::new(self.radius * theta.cos(), self.radius * theta.sin(), 0.0);
                let rotation = SO3::exp(Vector3::new(0.0, 0.0, theta));
                let camera_to_world = SE3::from_rotation_translation(rotation, position);
                camera_to_world.inverse()
            })
            .collect()
    }
}

/// Random walk in the tangent space, starting at the identity
pub struct WanderTrajectory {
    /// Step size for position (meters)
    pub position_step: f64,
    /// Step size for orientation (radians)
    pub orientation_step: f64,
}

impl TrajectoryGenerator for WanderTrajectory {
    fn generate(&self, n_frames: usize, seed: u64) -> Vec<SE3<f64>> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut poses = vec![SE3::identity()];

        for _ in 1..n_frames {
            let prev = poses.last().unwrap();
            let mut tangent = prev.log();
            for k in 0..3 {
                tangent[k] += rng.gen_range(-self.position_step..self.position_step);
            }
            for k in 3..6 {
                tangent[k] += rng.gen_range(-self.orientation_step..self.orientation_step);
            }
            poses.push(SE3::exp(tangent));
        }

        poses
    }
}

/// Synthetic training sample: orbiting camera, smooth noisy disparity ramp,
/// black images
///
/// `rows`/`cols` are the full image resolution; disparities are generated at
/// that resolution and positive everywhere.
pub fn synthetic_sample(n_frames: usize, rows: usize, cols: usize, seed: u64) -> Sample {
    let trajectory = OrbitTrajectory {
        radius: 4.0,
        angular_step: 0.02,
    };
    let poses = PoseBatch::from_poses(trajectory.generate(n_frames, seed));

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.02).unwrap();
    let maps = (0..n_frames)
        .map(|_| {
            DisparityMap::from_matrix(DMatrix::from_fn(rows, cols, |r, _| {
                let ramp = 0.4 + 0.2 * (r as f64 / rows.max(1) as f64);
                (ramp + noise.sample(&mut rng)).max(0.05)
            }))
        })
        .collect();

    Sample {
        images: ImageBatch::zeros(n_frames, rows, cols),
        poses,
        disparities: DisparityBatch::from_maps(maps),
        intrinsics: Intrinsics::simple(0.8 * cols as f64, cols as f64, rows as f64),
    }
}

/// Degenerate sample with identical poses and uniform unit disparity
///
/// The trivial state initialization already matches this ground truth, so
/// every loss must be (near) zero against it.
pub fn stationary_sample(n_frames: usize, rows: usize, cols: usize) -> Sample {
    Sample {
        images: ImageBatch::zeros(n_frames, rows, cols),
        poses: PoseBatch::identity(n_frames),
        disparities: DisparityBatch::constant(n_frames, rows, cols, 1.0),
        intrinsics: Intrinsics::simple(0.8 * cols as f64, cols as f64, rows as f64),
    }
}

/// Estimator that returns ground truth with zero residuals
pub struct OracleEstimator {
    poses: PoseBatch,
    disparity: DisparityBatch,
    /// Losses handed to `backward`, one per round
    pub backward_losses: Vec<f64>,
}

impl OracleEstimator {
    /// Oracle over a sample's ground truth
    pub fn for_sample(sample: &Sample) -> Self {
        Self {
            poses: sample.poses.clone(),
            disparity: sample.disparities.to_working_resolution(),
            backward_losses: Vec::new(),
        }
    }
}

impl PoseDepthEstimator for OracleEstimator {
    fn estimate(&mut self, input: &EstimatorInput<'_>) -> EstimatorOutput {
        let n_iters = input.iterations.max(1);
        let n_edges = input.graph.num_edges();

        EstimatorOutput {
            poses: vec![self.poses.clone(); n_iters],
            disparities: vec![self.disparity.clone(); n_iters],
            residuals: vec![DVector::zeros(n_edges); n_iters],
        }
    }

    fn backward(&mut self, loss: f64) {
        self.backward_losses.push(loss);
    }
}

/// Estimator that perturbs ground truth with seeded Gaussian noise
///
/// Noise shrinks over the internal iterations, mimicking a refiner that
/// converges toward ground truth. Fixed frames are never perturbed.
pub struct NoisyEstimator {
    poses: PoseBatch,
    disparity: DisparityBatch,
    sigma: f64,
    rng: ChaCha8Rng,
}

impl NoisyEstimator {
    pub fn for_sample(sample: &Sample, sigma: f64, seed: u64) -> Self {
        Self {
            poses: sample.poses.clone(),
            disparity: sample.disparities.to_working_resolution(),
            sigma,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl PoseDepthEstimator for NoisyEstimator {
    fn estimate(&mut self, input: &EstimatorInput<'_>) -> EstimatorOutput {
        let n_iters = input.iterations.max(1);
        let n_edges = input.graph.num_edges();
        let noise = Normal::new(0.0, 1.0).unwrap();

        let mut poses = Vec::with_capacity(n_iters);
        let mut disparities = Vec::with_capacity(n_iters);
        let mut residuals = Vec::with_capacity(n_iters);

        for k in 0..n_iters {
            let scale = self.sigma * (n_iters - k) as f64 / n_iters as f64;

            let mut pose_iter = self.poses.clone();
            for frame in input.fixed_frames..pose_iter.len() {
                let dt = Vector3::new(
                    noise.sample(&mut self.rng),
                    noise.sample(&mut self.rng),
                    noise.sample(&mut self.rng),
                ) * scale;
                let dr = Vector3::new(
                    noise.sample(&mut self.rng),
                    noise.sample(&mut self.rng),
                    noise.sample(&mut self.rng),
                ) * (0.1 * scale);

                let pose = &mut pose_iter[frame];
                pose.translation += dt;
                pose.rotation = SO3::exp(dr) * pose.rotation;
            }

            let mut disp_iter = self.disparity.clone();
            for frame in 0..disp_iter.len() {
                let map = disp_iter.get_mut(frame);
                for r in 0..map.rows() {
                    for c in 0..map.cols() {
                        let jitter = noise.sample(&mut self.rng) * 0.1 * scale;
                        map.set(r, c, map.get(r, c) + jitter);
                    }
                }
            }
            disp_iter.clamp_non_negative();

            let residual = DVector::from_fn(n_edges, |_, _| {
                (noise.sample(&mut self.rng) * scale).abs()
            });

            poses.push(pose_iter);
            disparities.push(disp_iter);
            residuals.push(residual);
        }

        EstimatorOutput {
            poses,
            disparities,
            residuals,
        }
    }
}

/// Endless stream of seeded synthetic samples
pub struct SyntheticDataSource {
    pub n_frames: usize,
    pub rows: usize,
    pub cols: usize,
    next_seed: u64,
    remaining: usize,
}

impl SyntheticDataSource {
    /// Source yielding `len` samples with seeds starting at `first_seed`
    pub fn new(n_frames: usize, rows: usize, cols: usize, first_seed: u64, len: usize) -> Self {
        Self {
            n_frames,
            rows,
            cols,
            next_seed: first_seed,
            remaining: len,
        }
    }
}

impl DataSource for SyntheticDataSource {
    fn next_sample(&mut self) -> Option<Sample> {
        if self.remaining == 0 {
            return None;
        }
        let sample = synthetic_sample(self.n_frames, self.rows, self.cols, self.next_seed);
        self.next_seed += 1;
        self.remaining -= 1;
        Some(sample)
    }
}
