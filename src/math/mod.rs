//! Lie group math for rotations, rigid motions, and similarity transforms
//!
//! The whole layer is generic over the scalar type so that a forward-mode AD
//! scalar can be threaded through composition, inversion, and the exp/log
//! maps. Concrete code in the rest of the crate instantiates with `f64`.

mod so3;
mod se3;
mod sim3;

pub use so3::{left_jacobian, left_jacobian_inv, skew, SO3};
pub use se3::SE3;
pub use sim3::Sim3;

use nalgebra::RealField;

/// Convert an `f64` literal into the generic scalar type.
pub(crate) fn lit<T: RealField>(x: f64) -> T {
    nalgebra::convert(x)
}
