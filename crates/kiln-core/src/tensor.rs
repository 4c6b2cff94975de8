//! Tensor views over GPU-resident buffers.

use crate::types::DataType;
use std::fmt;

/// Opaque identifier of a GPU buffer owned by the buffer manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer #{}", self.0)
    }
}

/// Identifier of an inference session that registers external buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session #{}", self.0)
    }
}

/// Metadata view of a tensor whose data lives in a GPU buffer.
///
/// Views are cheap to clone; they do not own the buffer they point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorView {
    /// Backing buffer.
    pub buffer: BufferId,

    /// Element data type.
    pub dtype: DataType,

    /// Concrete shape dimensions.
    pub dims: Vec<usize>,
}

impl TensorView {
    pub fn new(buffer: BufferId, dtype: DataType, dims: &[usize]) -> Self {
        Self {
            buffer,
            dtype,
            dims: dims.to_vec(),
        }
    }

    /// Total number of elements.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Size of the tensor data in bytes.
    pub fn size_bytes(&self) -> usize {
        self.num_elements() * self.dtype.size()
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Check whether the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.num_elements() == 0
    }
}
