//! Per-frame pose batches
//!
//! A [`PoseBatch`] is an ordered sequence of world-to-camera poses indexed by
//! frame id, with the group operations lifted elementwise. The estimation
//! loop and the loss layer both operate on whole batches at a time.

use crate::math::SE3;
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Ordered per-frame poses (world-to-camera), indexed by frame id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseBatch {
    poses: Vec<SE3<f64>>,
}

impl PoseBatch {
    /// Batch of identity poses
    pub fn identity(len: usize) -> Self {
        Self {
            poses: vec![SE3::identity(); len],
        }
    }

    /// Wrap an existing pose sequence
    pub fn from_poses(poses: Vec<SE3<f64>>) -> Self {
        Self { poses }
    }

    /// Repeat a single pose for every frame
    pub fn broadcast(pose: SE3<f64>, len: usize) -> Self {
        Self {
            poses: vec![pose; len],
        }
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.poses.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Iterate over the per-frame poses
    pub fn iter(&self) -> impl Iterator<Item = &SE3<f64>> {
        self.poses.iter()
    }

    /// Elementwise inverse
    pub fn inverse(&self) -> Self {
        Self {
            poses: self.poses.iter().map(|p| p.inverse()).collect(),
        }
    }

    /// Elementwise composition; both batches must cover the same frames
    pub fn compose(&self, other: &PoseBatch) -> Self {
        debug_assert_eq!(self.len(), other.len(), "batch length mismatch");
        Self {
            poses: self
                .poses
                .iter()
                .zip(other.poses.iter())
                .map(|(a, b)| *a * *b)
                .collect(),
        }
    }

    /// Relative pose mapping frame `i`'s camera coordinates into frame `j`'s:
    /// `g_j . g_i^-1`
    pub fn relative(&self, i: usize, j: usize) -> SE3<f64> {
        self.poses[j] * self.poses[i].inverse()
    }

    /// Restore the unit-quaternion invariant on every rotation
    pub fn renormalize(&mut self) {
        for pose in &mut self.poses {
            *pose = pose.renormalized();
        }
    }

    /// True when every pose component is finite
    pub fn is_finite(&self) -> bool {
        self.poses.iter().all(|p| p.is_finite())
    }
}

impl Index<usize> for PoseBatch {
    type Output = SE3<f64>;

    fn index(&self, frame: usize) -> &SE3<f64> {
        &self.poses[frame]
    }
}

impl IndexMut<usize> for PoseBatch {
    fn index_mut(&mut self, frame: usize) -> &mut SE3<f64> {
        &mut self.poses[frame]
    }
}
