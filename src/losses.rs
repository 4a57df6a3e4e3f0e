//! Loss and residual evaluators
//!
//! Three independent, side-effect-free evaluators score a round's estimates
//! against ground truth: geodesic pose error over graph edges, the
//! estimator's own residual magnitudes, and reprojected-flow error. Each
//! returns a scalar loss plus named diagnostics. Intermediate iterates are
//! discounted geometrically so later iterations dominate.

use crate::camera::Intrinsics;
use crate::data::Metrics;
use crate::depth::{DisparityBatch, WORKING_STRIDE};
use crate::frame_graph::FrameGraph;
use crate::math::{SE3, Sim3};
use crate::pose_batch::PoseBatch;
use crate::projective::induced_flow;
use nalgebra::DVector;

/// Relative weights combining the three losses into the training objective
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossWeights {
    pub geodesic: f64,
    pub residual: f64,
    pub flow: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            geodesic: 10.0,
            residual: 0.01,
            flow: 0.05,
        }
    }
}

impl LossWeights {
    /// Weighted total: `w1 * geodesic + w2 * residual + w3 * flow`
    pub fn combine(&self, geodesic: f64, residual: f64, flow: f64) -> f64 {
        self.geodesic * geodesic + self.residual * residual + self.flow * flow
    }
}

/// Error thresholds for the bad-edge fractions reported as metrics
const BAD_ROTATION: f64 = 0.1;
const BAD_TRANSLATION: f64 = 0.1;

/// Geodesic pose loss over graph edges
///
/// For every edge `(i, j)` and every estimate iterate, compares the estimated
/// relative pose against ground truth via `log(dG . dP^-1)`, summing the
/// translational and rotational tangent norms. Iterate `k` of `n` is weighted
/// `gamma^(n-1-k)`. With `normalize_scale`, a least-squares global scale is
/// fitted to the estimated relative translations first, removing the gauge
/// ambiguity of monocular reconstructions.
pub fn geodesic_loss(
    gt: &PoseBatch,
    iterates: &[PoseBatch],
    graph: &FrameGraph,
    gamma: f64,
    normalize_scale: bool,
) -> (f64, Metrics) {
    let edges = graph.edge_list();
    let n_iters = iterates.len();
    if edges.is_empty() || n_iters == 0 {
        return (0.0, Metrics::new());
    }

    let gt_rel: Vec<SE3<f64>> = edges.iter().map(|&(i, j)| gt.relative(i, j)).collect();

    let mut loss = 0.0;
    let mut metrics = Metrics::new();

    for (k, est) in iterates.iter().enumerate() {
        let weight = gamma.powi((n_iters - 1 - k) as i32);
        let est_rel: Vec<SE3<f64>> = edges.iter().map(|&(i, j)| est.relative(i, j)).collect();

        let scale = if normalize_scale {
            fit_translation_scale(&gt_rel, &est_rel)
        } else {
            1.0
        };

        let mut tau_sum = 0.0;
        let mut phi_sum = 0.0;
        let mut rot_errors = Vec::new();
        let mut tr_errors = Vec::new();
        let mut scale_errors = Vec::new();

        for (dp, dg) in gt_rel.iter().zip(est_rel.iter()) {
            let mut dg_aligned = *dg;
            dg_aligned.translation *= scale;

            let error = dg_aligned * dp.inverse();
            let d = error.log();
            tau_sum += d.fixed_rows::<3>(0).norm();
            phi_sum += d.fixed_rows::<3>(3).norm();

            if k == n_iters - 1 {
                let error_sim = Sim3::from_se3_with_scale(&error, scale);
                rot_errors.push(error_sim.rotation.angle());
                tr_errors.push(error_sim.translation.norm());
                scale_errors.push((error_sim.scale - 1.0).abs());
            }
        }

        let n_edges = edges.len() as f64;
        loss += weight * (tau_sum / n_edges + phi_sum / n_edges);

        if k == n_iters - 1 {
            let n = rot_errors.len() as f64;
            metrics.insert("rot_error".to_string(), rot_errors.iter().sum::<f64>() / n);
            metrics.insert("tr_error".to_string(), tr_errors.iter().sum::<f64>() / n);
            metrics.insert(
                "bad_rot".to_string(),
                rot_errors.iter().filter(|&&r| r > BAD_ROTATION).count() as f64 / n,
            );
            metrics.insert(
                "bad_tr".to_string(),
                tr_errors.iter().filter(|&&t| t > BAD_TRANSLATION).count() as f64 / n,
            );
            if normalize_scale {
                metrics.insert(
                    "scale_error".to_string(),
                    scale_errors.iter().sum::<f64>() / n,
                );
            }
        }
    }

    (loss, metrics)
}

/// Least-squares scale aligning estimated relative translations to ground
/// truth: minimizes `sum || t_gt - s * t_est ||^2`
fn fit_translation_scale(gt_rel: &[SE3<f64>], est_rel: &[SE3<f64>]) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for (dp, dg) in gt_rel.iter().zip(est_rel.iter()) {
        num += dp.translation.dot(&dg.translation);
        den += dg.translation.norm_squared();
    }

    let scale = num / den;
    if scale.is_finite() && scale > 1e-8 {
        scale
    } else {
        1.0
    }
}

/// Residual loss: discounted mean absolute magnitude of the estimator's
/// internal per-iteration residuals
pub fn residual_loss(residuals: &[DVector<f64>], gamma: f64) -> (f64, Metrics) {
    let n_iters = residuals.len();
    let mut loss = 0.0;

    for (k, r) in residuals.iter().enumerate() {
        if r.is_empty() {
            continue;
        }
        let weight = gamma.powi((n_iters - 1 - k) as i32);
        let mean_abs = r.iter().map(|v| v.abs()).sum::<f64>() / r.len() as f64;
        loss += weight * mean_abs;
    }

    let mut metrics = Metrics::new();
    metrics.insert("residual".to_string(), loss);
    (loss, metrics)
}

/// Reprojected-flow loss over graph edges
///
/// Compares the 2D flow induced by the estimated poses and disparities
/// against the flow induced by ground truth, per edge, over pixels valid in
/// both fields. Ground-truth disparities arrive at full resolution and are
/// downsampled here; estimated disparities are already at the working
/// resolution. Iterates are discounted like the geodesic loss.
pub fn flow_loss(
    gt_poses: &PoseBatch,
    gt_disparities: &DisparityBatch,
    est_pose_iterates: &[PoseBatch],
    est_disparity_iterates: &[DisparityBatch],
    intrinsics: &Intrinsics,
    graph: &FrameGraph,
    gamma: f64,
) -> (f64, Metrics) {
    let edges = graph.edge_list();
    let n_iters = est_pose_iterates.len();
    if edges.is_empty() || n_iters == 0 {
        return (0.0, Metrics::new());
    }

    let gt_working = gt_disparities.to_working_resolution();
    let working_intrinsics = intrinsics.scaled(1.0 / WORKING_STRIDE as f64);

    let gt_flows: Vec<_> = edges
        .iter()
        .map(|&(i, j)| induced_flow(&gt_poses[i], &gt_poses[j], gt_working.get(i), &working_intrinsics))
        .collect();

    let mut loss = 0.0;
    let mut final_epes: Vec<f64> = Vec::new();

    for k in 0..n_iters {
        let weight = gamma.powi((n_iters - 1 - k) as i32);
        let est_poses = &est_pose_iterates[k];
        let est_disps = &est_disparity_iterates[k];

        let mut epe_sum = 0.0;
        let mut epe_count = 0usize;

        for (e, &(i, j)) in edges.iter().enumerate() {
            let est_flow = induced_flow(
                &est_poses[i],
                &est_poses[j],
                est_disps.get(i),
                &working_intrinsics,
            );
            let gt_flow = &gt_flows[e];
            debug_assert_eq!(est_flow.du.nrows(), gt_flow.du.nrows());
            debug_assert_eq!(est_flow.du.ncols(), gt_flow.du.ncols());

            for r in 0..gt_flow.du.nrows() {
                for c in 0..gt_flow.du.ncols() {
                    if !(gt_flow.valid[(r, c)] && est_flow.valid[(r, c)]) {
                        continue;
                    }
                    let du = est_flow.du[(r, c)] - gt_flow.du[(r, c)];
                    let dv = est_flow.dv[(r, c)] - gt_flow.dv[(r, c)];
                    let epe = (du * du + dv * dv).sqrt();

                    epe_sum += epe;
                    epe_count += 1;
                    if k == n_iters - 1 {
                        final_epes.push(epe);
                    }
                }
            }
        }

        if epe_count > 0 {
            loss += weight * (epe_sum / epe_count as f64);
        }
    }

    let mut metrics = Metrics::new();
    if !final_epes.is_empty() {
        let n = final_epes.len() as f64;
        metrics.insert(
            "flow_error".to_string(),
            final_epes.iter().sum::<f64>() / n,
        );
        metrics.insert(
            "flow_1px".to_string(),
            final_epes.iter().filter(|&&e| e < 1.0).count() as f64 / n,
        );
    }

    (loss, metrics)
}
