//! Program signatures: the compiled-artifact cache key.

use crate::program::ProgramMetadata;
use crate::tensor::TensorView;
use std::fmt;
use std::fmt::Write;

/// Deterministic key identifying interchangeable compiled programs.
///
/// Format: `name['[' hint ']']':' dtype ';' dims ('|' dtype ';' dims)*`, where
/// `dtype` is the ONNX type code and `dims` is comma-separated. The format is
/// stable so keys can be compared across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramSignature(String);

impl ProgramSignature {
    /// Compute the signature of a program applied to `inputs`.
    pub fn new(metadata: &ProgramMetadata, inputs: &[TensorView]) -> Self {
        let mut key = metadata.name.clone();
        if let Some(hint) = metadata.cache_hint.as_deref().filter(|h| !h.is_empty()) {
            key.push('[');
            key.push_str(hint);
            key.push(']');
        }
        key.push(':');

        for (i, input) in inputs.iter().enumerate() {
            if i > 0 {
                key.push('|');
            }
            // Writing to a String cannot fail
            let _ = write!(key, "{};", input.dtype.onnx_code());
            for (d, dim) in input.dims.iter().enumerate() {
                if d > 0 {
                    key.push(',');
                }
                let _ = write!(key, "{dim}");
            }
        }

        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProgramSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
