//! Camera intrinsics
//!
//! Standard pinhole model:
//!   u = fx * X/Z + cx
//!   v = fy * Y/Z + cy

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Pinhole camera intrinsic parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    /// Focal length in x direction (pixels)
    pub fx: f64,
    /// Focal length in y direction (pixels)
    pub fy: f64,
    /// Principal point x coordinate (pixels)
    pub cx: f64,
    /// Principal point y coordinate (pixels)
    pub cy: f64,
}

impl Intrinsics {
    /// Create new intrinsics
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Simple camera with square pixels and a centered principal point
    pub fn simple(focal_length: f64, image_width: f64, image_height: f64) -> Self {
        Self::new(
            focal_length,
            focal_length,
            image_width * 0.5,
            image_height * 0.5,
        )
    }

    /// Rescale to a different working resolution
    ///
    /// All four parameters scale with the image, so `scaled(1.0 / 8.0)` gives
    /// intrinsics consistent with a grid downsampled by stride 8.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            fx: self.fx * factor,
            fy: self.fy * factor,
            cx: self.cx * factor,
            cy: self.cy * factor,
        }
    }

    /// Project a 3D point in camera coordinates to 2D pixel coordinates
    ///
    /// The point must be in front of the camera (Z > 0) for a valid result.
    pub fn project(&self, point_cam: Vector3<f64>) -> (f64, f64) {
        let inv_z = 1.0 / point_cam.z;
        let u = self.fx * point_cam.x * inv_z + self.cx;
        let v = self.fy * point_cam.y * inv_z + self.cy;

        (u, v)
    }

    /// Unproject a 2D pixel to a 3D point at the given depth
    pub fn unproject(&self, u: f64, v: f64, depth: f64) -> Vector3<f64> {
        let x = (u - self.cx) * depth / self.fx;
        let y = (v - self.cy) * depth / self.fy;
        Vector3::new(x, y, depth)
    }
}
