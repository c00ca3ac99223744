//! Manifold sample model
//!
//! Defines the six sampling spaces, conversions among pose, flat sample,
//! classifier input, and tangent velocity, and the manifold operators used
//! by the planners.

pub mod ops;
pub mod space;

pub use ops::*;
pub use space::*;
