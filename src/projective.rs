//! Reprojection and induced optical flow
//!
//! Given two camera poses and an inverse-depth grid for the first, every
//! working-grid pixel can be unprojected, carried through the relative
//! motion, and reprojected into the second frame. The resulting 2D
//! displacement field ("induced flow") drives both the co-visibility score
//! and the flow loss.

use crate::camera::Intrinsics;
use crate::depth::{DisparityBatch, DisparityMap};
use crate::math::SE3;
use crate::pose_batch::PoseBatch;
use nalgebra::DMatrix;

/// Disparities at or below this value are treated as unobserved
pub const MIN_DISPARITY: f64 = 0.01;
/// Reprojected points closer than this are behind or grazing the camera
pub const MIN_DEPTH: f64 = 0.1;

/// Dense 2D displacement field over the working grid
#[derive(Debug, Clone)]
pub struct FlowField {
    /// Horizontal displacement per pixel
    pub du: DMatrix<f64>,
    /// Vertical displacement per pixel
    pub dv: DMatrix<f64>,
    /// Whether the pixel reprojected to a valid point in front of the camera
    pub valid: DMatrix<bool>,
}

impl FlowField {
    /// Mean flow magnitude over valid pixels, `None` when nothing is valid
    pub fn mean_magnitude(&self) -> Option<f64> {
        let mut sum = 0.0;
        let mut count = 0usize;

        for ((du, dv), valid) in self.du.iter().zip(self.dv.iter()).zip(self.valid.iter()) {
            if *valid {
                sum += (du * du + dv * dv).sqrt();
                count += 1;
            }
        }

        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}

/// Induced flow from frame `i` into frame `j`
///
/// `pose_i`/`pose_j` are world-to-camera, `disp_i` is frame `i`'s
/// inverse-depth grid at the working resolution, and `intrinsics` must be
/// scaled to the same resolution.
pub fn induced_flow(
    pose_i: &SE3<f64>,
    pose_j: &SE3<f64>,
    disp_i: &DisparityMap,
    intrinsics: &Intrinsics,
) -> FlowField {
    let rows = disp_i.rows();
    let cols = disp_i.cols();
    let relative = *pose_j * pose_i.inverse();

    let mut du = DMatrix::zeros(rows, cols);
    let mut dv = DMatrix::zeros(rows, cols);
    let mut valid = DMatrix::from_element(rows, cols, false);

    for r in 0..rows {
        for c in 0..cols {
            let disparity = disp_i.get(r, c);
            if disparity <= MIN_DISPARITY {
                continue;
            }

            let point_i = intrinsics.unproject(c as f64, r as f64, 1.0 / disparity);
            let point_j = relative.transform_point(point_i);
            if point_j.z <= MIN_DEPTH {
                continue;
            }

            let (u, v) = intrinsics.project(point_j);
            du[(r, c)] = u - c as f64;
            dv[(r, c)] = v - r as f64;
            valid[(r, c)] = true;
        }
    }

    FlowField { du, dv, valid }
}

/// Pairwise co-visibility distances: mean induced-flow magnitude between
/// every frame pair, symmetrized over both directions
///
/// Entries with no validly reprojected pixel (and the diagonal) are
/// `f64::INFINITY`, which excludes them as graph edge candidates.
pub fn flow_distance_matrix(
    poses: &PoseBatch,
    disps: &DisparityBatch,
    intrinsics: &Intrinsics,
) -> DMatrix<f64> {
    let n = poses.len();
    let mut directed = DMatrix::from_element(n, n, f64::INFINITY);

    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let flow = induced_flow(&poses[i], &poses[j], disps.get(i), intrinsics);
            if let Some(mean) = flow.mean_magnitude() {
                directed[(i, j)] = mean;
            }
        }
    }

    DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            f64::INFINITY
        } else {
            0.5 * (directed[(i, j)] + directed[(j, i)])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::SO3;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;

    fn working_intrinsics() -> Intrinsics {
        Intrinsics::simple(8.0, 8.0, 6.0)
    }

    #[test]
    fn test_identity_relative_pose_gives_zero_flow() {
        let pose = SE3::from_rotation_translation(
            SO3::exp(Vector3::new(0.1, 0.2, 0.0)),
            Vector3::new(1.0, 0.0, 0.0),
        );
        let disp = DisparityMap::constant(6, 8, 0.5);

        let flow = induced_flow(&pose, &pose, &disp, &working_intrinsics());

        for ((du, dv), valid) in flow.du.iter().zip(flow.dv.iter()).zip(flow.valid.iter()) {
            assert!(*valid);
            assert_abs_diff_eq!(*du, 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(*dv, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_camera_shift_moves_pixels_opposite() {
        // Camera j is camera i translated +X in the world; in world-to-camera
        // terms points shift by -X, so pixels flow left.
        let pose_i = SE3::identity();
        let pose_j =
            SE3::from_rotation_translation(SO3::identity(), Vector3::new(-0.5, 0.0, 0.0));
        let disp = DisparityMap::constant(6, 8, 0.5);

        let flow = induced_flow(&pose_i, &pose_j, &disp, &working_intrinsics());

        for (du, valid) in flow.du.iter().zip(flow.valid.iter()) {
            assert!(*valid);
            assert!(*du < 0.0, "expected leftward flow, got {}", du);
        }
    }

    #[test]
    fn test_zero_disparity_pixels_are_invalid() {
        let disp = DisparityMap::constant(4, 4, 0.0);
        let flow = induced_flow(
            &SE3::identity(),
            &SE3::identity(),
            &disp,
            &working_intrinsics(),
        );

        assert!(flow.valid.iter().all(|v| !v));
        assert!(flow.mean_magnitude().is_none());
    }

    #[test]
    fn test_distance_matrix_is_symmetric_with_infinite_diagonal() {
        let poses = PoseBatch::from_poses(vec![
            SE3::identity(),
            SE3::from_rotation_translation(SO3::identity(), Vector3::new(0.2, 0.0, 0.0)),
            SE3::from_rotation_translation(SO3::identity(), Vector3::new(0.4, 0.0, 0.0)),
        ]);
        let disps = DisparityBatch::constant(3, 6, 8, 0.5);

        let d = flow_distance_matrix(&poses, &disps, &working_intrinsics());

        for i in 0..3 {
            assert!(d[(i, i)].is_infinite());
            for j in 0..3 {
                if i != j {
                    assert_abs_diff_eq!(d[(i, j)], d[(j, i)], epsilon = 1e-12);
                    assert!(d[(i, j)].is_finite());
                }
            }
        }

        // Farther frames induce more flow
        assert!(d[(0, 2)] > d[(0, 1)]);
    }
}
