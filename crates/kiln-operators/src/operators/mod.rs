//! Operators that do not fit a family.

pub mod softmax;

pub use softmax::{SoftmaxAttr, parse_softmax, run_softmax};
