//! Ready-made descriptors built on the extension contract.
//!
//! These exercise every part of [`Context`](crate::Context): optional
//! arguments ([`LinearFunction`]), non-tensor arguments ([`MulConstant`]),
//! non-differentiable outputs ([`ClampWithMask`]) and in-place updates
//! ([`AddInPlace`]).

mod add_inplace;
mod clamp;
mod linear;
mod mul_constant;

pub use self::add_inplace::AddInPlace;
pub use self::clamp::ClampWithMask;
pub use self::linear::LinearFunction;
pub use self::mul_constant::MulConstant;
