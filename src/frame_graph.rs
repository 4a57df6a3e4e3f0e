//! Frame graph construction
//!
//! The frame graph decides which frame pairs are jointly optimized. It is
//! rebuilt fresh every training step by one of two policies: co-visibility
//! scoring on the ground-truth geometry, or a fixed local window over frame
//! indices. Downstream code never depends on which policy produced it.

use crate::camera::Intrinsics;
use crate::depth::DisparityBatch;
use crate::pose_batch::PoseBatch;
use crate::projective::flow_distance_matrix;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Fatal graph-construction failures
///
/// A frame left without neighbors would silently drop out of the joint
/// optimization, so these surface as errors instead of degraded graphs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("frame graph requires at least 2 frames, got {0}")]
    TooFewFrames(usize),
    #[error("frame {frame} has no co-visible neighbor candidates")]
    IsolatedFrame { frame: usize },
}

/// Which builder produced a step's graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphPolicy {
    /// Edges scored by shared visual overlap
    Covisibility,
    /// Fixed adjacency over frame indices
    LocalWindow,
}

impl GraphPolicy {
    /// Per-step policy draw: 50% co-visibility, 50% local window
    pub fn draw<R: Rng>(rng: &mut R) -> Self {
        if rng.gen::<f64>() < 0.5 {
            GraphPolicy::Covisibility
        } else {
            GraphPolicy::LocalWindow
        }
    }
}

/// Directed adjacency: frame id -> ordered neighbor ids
///
/// Never contains self-loops. Rebuilt per step, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGraph {
    edges: BTreeMap<usize, Vec<usize>>,
}

impl FrameGraph {
    /// Fixed-bandwidth adjacency: frame `i` connects to every `j != i` with
    /// `|i - j| <= radius`
    pub fn local_window(n_frames: usize, radius: usize) -> Result<Self, GraphError> {
        if n_frames < 2 {
            return Err(GraphError::TooFewFrames(n_frames));
        }
        if radius == 0 {
            return Err(GraphError::IsolatedFrame { frame: 0 });
        }

        let mut edges = BTreeMap::new();
        for i in 0..n_frames {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius).min(n_frames - 1);
            let neighbors: Vec<usize> = (lo..=hi).filter(|&j| j != i).collect();
            edges.insert(i, neighbors);
        }

        Ok(Self { edges })
    }

    /// Co-visibility adjacency from ground-truth geometry
    ///
    /// Scores every frame pair by mean induced-flow magnitude (smaller flow
    /// means more shared view), then selects edges globally in ascending
    /// distance up to `budget` directed edges, after guaranteeing every frame
    /// its single nearest candidate. `disps` and `intrinsics` must already be
    /// at the working resolution.
    pub fn covisibility(
        poses: &PoseBatch,
        disps: &DisparityBatch,
        intrinsics: &Intrinsics,
        budget: usize,
    ) -> Result<Self, GraphError> {
        let n = poses.len();
        if n < 2 {
            return Err(GraphError::TooFewFrames(n));
        }

        let distance = flow_distance_matrix(poses, disps, intrinsics);
        let mut chosen: BTreeSet<(usize, usize)> = BTreeSet::new();

        // Every frame keeps its nearest candidate, or the graph is invalid.
        for i in 0..n {
            let best = (0..n)
                .filter(|&j| j != i && distance[(i, j)].is_finite())
                .min_by(|&a, &b| distance[(i, a)].total_cmp(&distance[(i, b)]));
            match best {
                Some(j) => {
                    chosen.insert((i, j));
                }
                None => return Err(GraphError::IsolatedFrame { frame: i }),
            }
        }

        // Fill the remaining budget globally, closest pairs first.
        let mut candidates: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| (0..n).map(move |j| (i, j)))
            .filter(|&(i, j)| i != j && distance[(i, j)].is_finite())
            .collect();
        candidates.sort_by(|&(ai, aj), &(bi, bj)| {
            distance[(ai, aj)]
                .total_cmp(&distance[(bi, bj)])
                .then((ai, aj).cmp(&(bi, bj)))
        });

        for pair in candidates {
            if chosen.len() >= budget {
                break;
            }
            chosen.insert(pair);
        }

        let mut edges: BTreeMap<usize, Vec<usize>> =
            (0..n).map(|i| (i, Vec::new())).collect();
        for (i, j) in chosen {
            edges.get_mut(&i).unwrap().push(j);
        }

        Ok(Self { edges })
    }

    /// Ordered neighbor ids of a frame; empty if the frame is unknown
    pub fn neighbors(&self, frame: usize) -> &[usize] {
        self.edges.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Frame ids covered by the graph, ascending
    pub fn frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.edges.keys().copied()
    }

    /// All directed edges `(i, j)` in deterministic order
    pub fn edge_list(&self) -> Vec<(usize, usize)> {
        self.edges
            .iter()
            .flat_map(|(&i, js)| js.iter().map(move |&j| (i, j)))
            .collect()
    }

    /// Number of frames covered
    pub fn num_frames(&self) -> usize {
        self.edges.len()
    }

    /// Total directed edge count
    pub fn num_edges(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Whether the directed edge `i -> j` exists
    pub fn contains_edge(&self, i: usize, j: usize) -> bool {
        self.neighbors(i).contains(&j)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{SE3, SO3};
    use nalgebra::Vector3;

    #[test]
    fn test_local_window_seven_frames_radius_two() {
        let graph = FrameGraph::local_window(7, 2).unwrap();

        assert_eq!(graph.neighbors(3), &[1, 2, 4, 5]);
        assert_eq!(graph.neighbors(0), &[1, 2]);
        assert_eq!(graph.neighbors(6), &[4, 5]);
    }

    #[test]
    fn test_local_window_never_self_loops() {
        for n in 2..10 {
            for radius in 1..5 {
                let graph = FrameGraph::local_window(n, radius).unwrap();
                for i in graph.frames() {
                    assert!(
                        !graph.contains_edge(i, i),
                        "self loop at frame {} (n={}, radius={})",
                        i,
                        n,
                        radius
                    );
                    assert!(!graph.neighbors(i).is_empty());
                }
            }
        }
    }

    #[test]
    fn test_local_window_rejects_degenerate_inputs() {
        assert_eq!(
            FrameGraph::local_window(1, 2),
            Err(GraphError::TooFewFrames(1))
        );
        assert_eq!(
            FrameGraph::local_window(5, 0),
            Err(GraphError::IsolatedFrame { frame: 0 })
        );
    }

    fn translating_scene(n: usize) -> (PoseBatch, DisparityBatch, Intrinsics) {
        let poses = PoseBatch::from_poses(
            (0..n)
                .map(|i| {
                    SE3::from_rotation_translation(
                        SO3::identity(),
                        Vector3::new(0.1 * i as f64, 0.0, 0.0),
                    )
                })
                .collect(),
        );
        let disps = DisparityBatch::constant(n, 6, 8, 0.5);
        let intrinsics = Intrinsics::simple(8.0, 8.0, 6.0);
        (poses, disps, intrinsics)
    }

    #[test]
    fn test_covisibility_prefers_nearby_frames() {
        let (poses, disps, intrinsics) = translating_scene(5);
        let graph = FrameGraph::covisibility(&poses, &disps, &intrinsics, 12).unwrap();

        assert_eq!(graph.num_frames(), 5);
        for i in graph.frames() {
            assert!(!graph.contains_edge(i, i));
            assert!(!graph.neighbors(i).is_empty());
        }
        // Adjacent frames share the most view, so those edges must be in.
        assert!(graph.contains_edge(1, 2) || graph.contains_edge(1, 0));
        assert_eq!(graph.num_edges(), 12);
    }

    #[test]
    fn test_covisibility_rejects_blind_frames() {
        // Zero disparity everywhere: nothing reprojects, every pair invalid.
        let (poses, _, intrinsics) = translating_scene(4);
        let disps = DisparityBatch::constant(4, 6, 8, 0.0);

        let result = FrameGraph::covisibility(&poses, &disps, &intrinsics, 8);
        assert_eq!(result, Err(GraphError::IsolatedFrame { frame: 0 }));
    }

    #[test]
    fn test_graph_serializes_as_stable_mapping() {
        let graph = FrameGraph::local_window(4, 1).unwrap();

        let json = serde_json::to_string(&graph).unwrap();
        let back: FrameGraph = serde_json::from_str(&json).unwrap();

        assert_eq!(graph, back);
        assert_eq!(back.neighbors(1), &[0, 2]);
    }
}
