//! Element data types.

use std::fmt;

/// Element type of a GPU-resident tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    F16,
    I32,
    I64,
    U8,
    U32,
    Bool,
}

impl DataType {
    /// Size of this data type in bytes.
    ///
    /// Note: Bool returns 4 bytes to match GPU storage requirements. WGSL does not
    /// support bool in storage buffers, so boolean values are represented as u32
    /// (0 for false, 1 for true) in GPU memory.
    pub fn size(&self) -> usize {
        match self {
            DataType::F32 | DataType::I32 | DataType::U32 | DataType::Bool => 4,
            DataType::F16 => 2,
            DataType::I64 => 8,
            DataType::U8 => 1,
        }
    }

    /// ONNX `TensorProto.DataType` code.
    ///
    /// Program signatures embed this code, so it must stay stable.
    pub fn onnx_code(&self) -> i32 {
        match self {
            DataType::F32 => 1,
            DataType::U8 => 2,
            DataType::I32 => 6,
            DataType::I64 => 7,
            DataType::Bool => 9,
            DataType::F16 => 10,
            DataType::U32 => 12,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::F32 => "float32",
            DataType::F16 => "float16",
            DataType::I32 => "int32",
            DataType::I64 => "int64",
            DataType::U8 => "uint8",
            DataType::U32 => "uint32",
            DataType::Bool => "bool",
        };
        f.write_str(name)
    }
}
