//! Disparity (inverse-depth) grids
//!
//! The estimator works at a fixed resolution coarser than the input images:
//! full-resolution grids are sampled every [`WORKING_STRIDE`] pixels starting
//! at [`WORKING_OFFSET`]. Disparity is clamped non-negative after every
//! update since negative values put points behind the camera.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Downsampling stride between input resolution and the working grid
pub const WORKING_STRIDE: usize = 8;
/// Pixel offset of the first working-grid sample
pub const WORKING_OFFSET: usize = 3;

/// A single frame's inverse-depth grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisparityMap {
    data: DMatrix<f64>,
}

impl DisparityMap {
    /// Uniform disparity grid
    pub fn constant(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            data: DMatrix::from_element(rows, cols, value),
        }
    }

    /// Wrap an existing grid
    pub fn from_matrix(data: DMatrix<f64>) -> Self {
        Self { data }
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Disparity at `(row, col)`
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[(row, col)]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[(row, col)] = value;
    }

    /// Borrow the underlying grid
    pub fn as_matrix(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Strided subsample: keeps entries at `offset, offset + stride, ...`
    /// along both axes
    pub fn downsampled(&self, stride: usize, offset: usize) -> Self {
        let rows = sampled_len(self.rows(), stride, offset);
        let cols = sampled_len(self.cols(), stride, offset);

        Self {
            data: DMatrix::from_fn(rows, cols, |r, c| {
                self.data[(offset + r * stride, offset + c * stride)]
            }),
        }
    }

    /// Clamp every entry to be non-negative
    pub fn clamp_non_negative(&mut self) {
        for v in self.data.iter_mut() {
            if *v < 0.0 {
                *v = 0.0;
            }
        }
    }

    /// True when every entry is finite
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

/// One disparity grid per frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisparityBatch {
    maps: Vec<DisparityMap>,
}

impl DisparityBatch {
    /// Uniform batch: `len` frames of `rows x cols` grids at `value`
    pub fn constant(len: usize, rows: usize, cols: usize, value: f64) -> Self {
        Self {
            maps: (0..len)
                .map(|_| DisparityMap::constant(rows, cols, value))
                .collect(),
        }
    }

    /// Wrap existing per-frame grids
    pub fn from_maps(maps: Vec<DisparityMap>) -> Self {
        Self { maps }
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Grid for one frame
    pub fn get(&self, frame: usize) -> &DisparityMap {
        &self.maps[frame]
    }

    pub fn get_mut(&mut self, frame: usize) -> &mut DisparityMap {
        &mut self.maps[frame]
    }

    /// Iterate over the per-frame grids
    pub fn iter(&self) -> impl Iterator<Item = &DisparityMap> {
        self.maps.iter()
    }

    /// Downsample every frame to the working resolution
    pub fn to_working_resolution(&self) -> Self {
        Self {
            maps: self
                .maps
                .iter()
                .map(|m| m.downsampled(WORKING_STRIDE, WORKING_OFFSET))
                .collect(),
        }
    }

    /// Clamp every frame's disparities to be non-negative
    pub fn clamp_non_negative(&mut self) {
        for map in &mut self.maps {
            map.clamp_non_negative();
        }
    }

    /// True when every entry of every frame is finite
    pub fn is_finite(&self) -> bool {
        self.maps.iter().all(|m| m.is_finite())
    }
}

fn sampled_len(dim: usize, stride: usize, offset: usize) -> usize {
    if dim <= offset {
        0
    } else {
        (dim - offset).div_ceil(stride)
    }
}
