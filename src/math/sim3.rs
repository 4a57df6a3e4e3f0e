//! Sim(3) - 7-DOF similarity transformation (rotation + translation + scale)
//!
//! Used by the geodesic loss to measure pose error with an explicit scale
//! component, so a globally scale-ambiguous trajectory estimate can still be
//! scored fairly. Transforms points as `p' = s * R * p + t`.

use crate::math::so3::SO3;
use nalgebra::{RealField, Vector3};
use serde::{Deserialize, Serialize};

/// Sim(3) similarity transform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sim3<T: RealField + Copy> {
    pub rotation: SO3<T>,
    pub translation: Vector3<T>,
    pub scale: T,
}

impl<T: RealField + Copy> Sim3<T> {
    /// Identity transformation (no rotation, no translation, scale = 1)
    pub fn identity() -> Self {
        Self {
            rotation: SO3::identity(),
            translation: Vector3::zeros(),
            scale: T::one(),
        }
    }

    /// Lift a rigid motion into Sim(3) with scale = 1
    pub fn from_se3(se3: &super::SE3<T>) -> Self {
        Self {
            rotation: se3.rotation,
            translation: se3.translation,
            scale: T::one(),
        }
    }

    /// Lift a rigid motion into Sim(3) with an explicit scale
    pub fn from_se3_with_scale(se3: &super::SE3<T>, scale: T) -> Self {
        Self {
            rotation: se3.rotation,
            translation: se3.translation,
            scale,
        }
    }

    /// Inverse transformation
    ///
    /// For `S = [sR | t]`: `S^-1 = [(1/s)R^T | -(1/s)R^T t]`.
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        let scale_inv = T::one() / self.scale;
        Self {
            rotation: rot_inv,
            translation: -(rot_inv.rotate(self.translation)) * scale_inv,
            scale: scale_inv,
        }
    }

    /// Compose two transforms: `self . other`
    ///
    /// For `S1 = [s1 R1 | t1]` and `S2 = [s2 R2 | t2]`:
    /// `S1 . S2 = [s1 s2 R1 R2 | s1 R1 t2 + t1]`.
    pub fn compose(&self, other: &Sim3<T>) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation.rotate(other.translation) * self.scale + self.translation,
            scale: self.scale * other.scale,
        }
    }

    /// Transform a single point: `p' = s * R * p + t`
    pub fn transform_point(&self, p: Vector3<T>) -> Vector3<T> {
        self.rotation.rotate(p) * self.scale + self.translation
    }

    /// Log map: `[rotation_vec (3), translation (3), log_scale (1)]`
    pub fn log(&self) -> [T; 7] {
        let rot_vec = self.rotation.log();
        [
            rot_vec.x,
            rot_vec.y,
            rot_vec.z,
            self.translation.x,
            self.translation.y,
            self.translation.z,
            self.scale.ln(),
        ]
    }

    /// Exponential map from a 7-element tangent vector
    pub fn exp(tangent: &[T; 7]) -> Self {
        Self {
            rotation: SO3::exp(Vector3::new(tangent[0], tangent[1], tangent[2])),
            translation: Vector3::new(tangent[3], tangent[4], tangent[5]),
            scale: tangent[6].exp(),
        }
    }
}

impl<T: RealField + Copy> Default for Sim3<T> {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::SE3;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_identity() {
        let sim3 = Sim3::<f64>::identity();
        let p = Vector3::new(1.0, 2.0, 3.0);

        assert_abs_diff_eq!(sim3.transform_point(p), p, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse() {
        let sim3 = Sim3 {
            rotation: SO3::exp(Vector3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2)),
            translation: Vector3::new(1.0, 2.0, 3.0),
            scale: 2.0,
        };

        let composed = sim3.compose(&sim3.inverse());
        assert_abs_diff_eq!(composed.scale, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(composed.translation.norm(), 0.0, epsilon = 1e-12);

        let p = Vector3::new(1.0, 2.0, 3.0);
        let back = sim3.inverse().transform_point(sim3.transform_point(p));
        assert_abs_diff_eq!(back, p, epsilon = 1e-12);
    }

    #[test]
    fn test_compose_scales_multiply() {
        let s1 = Sim3 {
            rotation: SO3::identity(),
            translation: Vector3::new(1.0, 0.0, 0.0),
            scale: 2.0,
        };
        let s2 = Sim3 {
            rotation: SO3::identity(),
            translation: Vector3::new(0.0, 1.0, 0.0),
            scale: 3.0,
        };

        let composed = s1.compose(&s2);

        assert_abs_diff_eq!(composed.scale, 6.0, epsilon = 1e-12);
        // t = t1 + s1 * R1 * t2 = (1,0,0) + 2*(0,1,0)
        assert_abs_diff_eq!(composed.translation, Vector3::new(1.0, 2.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_transform_point_with_scale() {
        let sim3 = Sim3 {
            rotation: SO3::identity(),
            translation: Vector3::new(1.0, 0.0, 0.0),
            scale: 2.0,
        };

        let p = sim3.transform_point(Vector3::new(1.0, 1.0, 1.0));
        assert_abs_diff_eq!(p, Vector3::new(3.0, 2.0, 2.0), epsilon = 1e-12);
    }

    #[test]
    fn test_log_exp_roundtrip() {
        let sim3 = Sim3 {
            rotation: SO3::exp(Vector3::new(0.0, 0.5, 0.0)),
            translation: Vector3::new(1.0, 2.0, 3.0),
            scale: 1.5,
        };

        let reconstructed = Sim3::exp(&sim3.log());

        assert_abs_diff_eq!(reconstructed.scale, sim3.scale, epsilon = 1e-12);
        assert_abs_diff_eq!(reconstructed.translation, sim3.translation, epsilon = 1e-12);
        assert_abs_diff_eq!(
            reconstructed.rotation.quat.coords,
            sim3.rotation.quat.coords,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_from_se3_is_rigid() {
        let se3 = SE3::from_rotation_translation(
            SO3::exp(Vector3::new(0.1, 0.2, 0.3)),
            Vector3::new(-1.0, 0.5, 2.0),
        );
        let sim3 = Sim3::from_se3(&se3);

        assert_abs_diff_eq!(sim3.scale, 1.0, epsilon = 1e-12);
        let p = Vector3::new(0.3, -0.7, 1.1);
        assert_abs_diff_eq!(sim3.transform_point(p), se3.transform_point(p), epsilon = 1e-12);
    }
}
