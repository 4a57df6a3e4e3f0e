//! SO(3) - Special Orthogonal Group (3D Rotations)
//!
//! Type-safe wrapper around a unit quaternion with Lie algebra operations
//! (exp, log, composition). The skew/Jacobian helpers below are shared with
//! the SE(3) exp/log maps.

use crate::math::lit;
use nalgebra::{Matrix3, RealField, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// Below this angle the Jacobian series fall back to their Taylor expansions.
const SMALL_ANGLE: f64 = 1e-6;

/// SO(3) rotation representation
///
/// Internally stored as a unit quaternion, which keeps the group invariant
/// cheap to restore after numeric updates.
/// Use `exp()` to convert from axis-angle (tangent space) to SO3.
/// Use `log()` to convert from SO3 back to axis-angle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SO3<T: RealField + Copy> {
    /// Unit quaternion storing the rotation
    pub quat: UnitQuaternion<T>,
}

impl<T: RealField + Copy> SO3<T> {
    /// Create identity rotation
    pub fn identity() -> Self {
        Self {
            quat: UnitQuaternion::identity(),
        }
    }

    /// Wrap an existing unit quaternion
    pub fn from_quaternion(quat: UnitQuaternion<T>) -> Self {
        Self { quat }
    }

    /// Exponential map: axis-angle -> SO3
    ///
    /// The direction of `rvec` is the rotation axis, its magnitude the angle.
    pub fn exp(rvec: Vector3<T>) -> Self {
        Self {
            quat: UnitQuaternion::from_scaled_axis(rvec),
        }
    }

    /// Logarithm map: SO3 -> axis-angle
    ///
    /// Inverse of `exp()`.
    pub fn log(&self) -> Vector3<T> {
        self.quat.scaled_axis()
    }

    /// Rotate a 3D vector
    pub fn rotate(&self, v: Vector3<T>) -> Vector3<T> {
        self.quat * v
    }

    /// Exact inverse (conjugate quaternion)
    pub fn inverse(&self) -> Self {
        Self {
            quat: self.quat.inverse(),
        }
    }

    /// Rotation angle in radians
    pub fn angle(&self) -> T {
        self.quat.angle()
    }

    /// Restore the unit-norm invariant after accumulated numeric error
    pub fn renormalized(&self) -> Self {
        Self {
            quat: UnitQuaternion::new_normalize(self.quat.into_inner()),
        }
    }
}

/// Composition: SO3 * SO3
impl<T: RealField + Copy> Mul for SO3<T> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self {
            quat: self.quat * rhs.quat,
        }
    }
}

/// Constructs the skew-symmetric matrix `[v]x` such that `[v]x u = v x u`.
pub fn skew<T: RealField + Copy>(v: Vector3<T>) -> Matrix3<T> {
    let zero = T::zero();
    Matrix3::new(
        zero, -v.z, v.y,
        v.z, zero, -v.x,
        -v.y, v.x, zero,
    )
}

/// Left Jacobian Jl of SO(3)
///
/// ```text
/// Jl(phi) = I + (1 - cos t)/t^2 [phi]x + (t - sin t)/t^3 [phi]x^2
/// ```
///
/// For small angles: `Jl(phi) ~= I + 0.5 [phi]x + 1/6 [phi]x^2`.
pub fn left_jacobian<T: RealField + Copy>(phi: Vector3<T>) -> Matrix3<T> {
    let theta = phi.norm();
    let skew_phi = skew(phi);

    if theta < lit(SMALL_ANGLE) {
        return Matrix3::identity() + skew_phi * lit::<T>(0.5) + skew_phi * skew_phi * lit::<T>(1.0 / 6.0);
    }

    let theta_sq = theta * theta;
    let theta_cu = theta_sq * theta;
    let sin_theta = theta.sin();
    let cos_theta = theta.cos();

    Matrix3::identity()
        + skew_phi * ((T::one() - cos_theta) / theta_sq)
        + skew_phi * skew_phi * ((theta - sin_theta) / theta_cu)
}

/// Inverse of the left Jacobian, `Jl^-1(phi)`.
///
/// For small angles: `Jl^-1(phi) ~= I - 0.5 [phi]x + 1/12 [phi]x^2`.
pub fn left_jacobian_inv<T: RealField + Copy>(phi: Vector3<T>) -> Matrix3<T> {
    let theta = phi.norm();
    let skew_phi = skew(phi);

    if theta < lit(SMALL_ANGLE) {
        return Matrix3::identity() - skew_phi * lit::<T>(0.5)
            + skew_phi * skew_phi * lit::<T>(1.0 / 12.0);
    }

    let theta_sq = theta * theta;
    let sin_theta = theta.sin();
    let cos_theta = theta.cos();

    let coeff = T::one() / theta_sq - (T::one() + cos_theta) / (lit::<T>(2.0) * theta * sin_theta);

    Matrix3::identity() - skew_phi * lit::<T>(0.5) + skew_phi * skew_phi * coeff
}
