//! Core operator implementations for kiln.
//!
//! Each operator is an op-resolve rule: a run function that turns the
//! kernel's inputs into one or more program dispatches, plus an optional
//! attribute preprocessor.
//!
//! # Operator Families
//!
//! - **Binary elementwise**: Add, Sub, Mul, Div (NumPy broadcasting)
//! - **Unary elementwise**: Neg, Sqrt, Relu, Tanh, Sigmoid
//!
//! # Individual Operators
//!
//! - Softmax (two passes, row statistics in a temporary buffer)

pub mod families;
pub mod operators;

mod helpers;
mod registry;

pub use families::{BinaryElementwiseOp, UnaryElementwiseOp};
pub use helpers::{broadcast_shapes, normalize_axis};
pub use registry::core_op_registry;

/// Workgroup size used by every core operator.
pub(crate) const WORKGROUP_SIZE: u32 = 64;
