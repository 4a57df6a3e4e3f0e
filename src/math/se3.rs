//! SE(3) - Special Euclidean Group (3D Rigid Motions)
//!
//! Rotation stored as a unit quaternion, translation as a 3-vector. The
//! tangent-space layout is `[rho, phi]`: translational part first, rotational
//! part last, with the translation coupled through the SO(3) left Jacobian.

use crate::math::so3::{left_jacobian, left_jacobian_inv, SO3};
use nalgebra::{RealField, Vector3, Vector6};
use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// SE(3) rigid motion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SE3<T: RealField + Copy> {
    /// Rotation component
    pub rotation: SO3<T>,
    /// Translation component
    pub translation: Vector3<T>,
}

impl<T: RealField + Copy> SE3<T> {
    /// Identity transform
    pub fn identity() -> Self {
        Self {
            rotation: SO3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build from rotation and translation
    pub fn from_rotation_translation(rotation: SO3<T>, translation: Vector3<T>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Exponential map from the tangent space `[rho, phi]`
    ///
    /// The rotation is `exp(phi)`; the translation is `Jl(phi) * rho` so that
    /// exp/log are exact inverses of each other.
    pub fn exp(tangent: Vector6<T>) -> Self {
        let rho = tangent.fixed_rows::<3>(0).into_owned();
        let phi = tangent.fixed_rows::<3>(3).into_owned();

        Self {
            rotation: SO3::exp(phi),
            translation: left_jacobian(phi) * rho,
        }
    }

    /// Logarithm map into the tangent space `[rho, phi]`
    pub fn log(&self) -> Vector6<T> {
        let phi = self.rotation.log();
        let rho = left_jacobian_inv(phi) * self.translation;

        Vector6::new(rho.x, rho.y, rho.z, phi.x, phi.y, phi.z)
    }

    /// Exact closed-form inverse: `(R, t)^-1 = (R^-1, -R^-1 t)`
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -rot_inv.rotate(self.translation),
        }
    }

    /// Transform a point: `p' = R p + t`
    pub fn transform_point(&self, p: Vector3<T>) -> Vector3<T> {
        self.rotation.rotate(p) + self.translation
    }

    /// Restore the rotation's unit-quaternion invariant
    pub fn renormalized(&self) -> Self {
        Self {
            rotation: self.rotation.renormalized(),
            translation: self.translation,
        }
    }
}

impl SE3<f64> {
    /// True when every stored component is finite
    pub fn is_finite(&self) -> bool {
        self.translation.iter().all(|v| v.is_finite())
            && self.rotation.quat.coords.iter().all(|v| v.is_finite())
    }
}

/// Composition: SE3 * SE3
impl<T: RealField + Copy> Mul for SE3<T> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self {
            rotation: self.rotation * rhs.rotation,
            translation: self.rotation.rotate(rhs.translation) + self.translation,
        }
    }
}
