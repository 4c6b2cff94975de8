//! Collapsed operator families.
//!
//! Each family shares one shader and one run function; members differ only
//! in the shader definition that selects their arithmetic.

pub mod binary_elementwise;
pub mod unary_elementwise;

pub use binary_elementwise::BinaryElementwiseOp;
pub use unary_elementwise::UnaryElementwiseOp;
