//! External collaborator interfaces
//!
//! The training orchestrator, dataset pipeline, and metrics logger live
//! outside this crate. These are the data structures and traits they meet
//! the estimation core through.

use crate::camera::Intrinsics;
use crate::depth::DisparityBatch;
use crate::pose_batch::PoseBatch;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grayscale input images, one full-resolution frame per entry
///
/// The core never inspects pixel content; images pass through to the
/// learned estimator untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBatch {
    pub frames: Vec<DMatrix<f32>>,
}

impl ImageBatch {
    /// Batch of black frames (synthetic data and tests)
    pub fn zeros(len: usize, rows: usize, cols: usize) -> Self {
        Self {
            frames: (0..len).map(|_| DMatrix::zeros(rows, cols)).collect(),
        }
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// One training sample: a fixed-size sequence of posed frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Input images, full resolution
    pub images: ImageBatch,
    /// Ground-truth world-to-camera poses
    pub poses: PoseBatch,
    /// Ground-truth inverse depth, full resolution
    pub disparities: DisparityBatch,
    /// Camera intrinsics at full resolution
    pub intrinsics: Intrinsics,
}

impl Sample {
    /// Number of frames in the sequence
    pub fn num_frames(&self) -> usize {
        self.poses.len()
    }
}

/// Supplies training samples; sampling and shuffling live with the caller
pub trait DataSource {
    /// Next sample, or `None` when exhausted
    fn next_sample(&mut self) -> Option<Sample>;
}

/// Named scalar diagnostics reported per step
pub type Metrics = BTreeMap<String, f64>;

/// Consumes per-step metrics (console logger, experiment tracker, ...)
pub trait MetricsSink {
    fn push(&mut self, step: usize, metrics: &Metrics);
}

/// In-memory sink for tests and offline inspection
#[derive(Debug, Default)]
pub struct MemorySink {
    pub history: Vec<(usize, Metrics)>,
}

impl MetricsSink for MemorySink {
    fn push(&mut self, step: usize, metrics: &Metrics) {
        self.history.push((step, metrics.clone()));
    }
}
