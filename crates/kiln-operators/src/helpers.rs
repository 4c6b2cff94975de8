//! Shape helpers shared by operator implementations.

use kiln_core::{DataType, Error, Result, TensorView};

/// Broadcast multiple shapes to a common output shape.
///
/// Implements NumPy-style broadcasting rules:
/// - Shapes are aligned from the rightmost dimension
/// - Dimensions match if they are equal or one of them is 1
/// - Missing dimensions in shorter shapes are treated as 1
///
/// # Example
///
/// ```text
/// [2, 3, 4] + [3, 4]    -> [2, 3, 4]
/// [2, 3, 4] + [2, 1, 4] -> [2, 3, 4]
/// [8, 1, 6, 1] + [7, 1, 5] -> [8, 7, 6, 5]
/// ```
pub fn broadcast_shapes(shapes: &[&[usize]]) -> Result<Vec<usize>> {
    let max_rank = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut result = vec![1; max_rank];

    for shape in shapes {
        let rank = shape.len();
        for i in 0..rank {
            let shape_dim = shape[rank - 1 - i];
            let result_idx = max_rank - 1 - i;
            let dim = result[result_idx];

            if dim == 1 {
                result[result_idx] = shape_dim;
            } else if shape_dim != 1 && shape_dim != dim {
                return Err(Error::Shape(format!(
                    "Cannot broadcast shapes: dimension mismatch at position {result_idx} (expected {dim} or 1, got {shape_dim})"
                )));
            }
        }
    }

    Ok(result)
}

/// Element strides of `input` when read at the coordinates of `output`.
///
/// The result has `output.len()` entries. Broadcast dimensions (size 1 in
/// `input`, or missing from it) get stride 0.
pub fn broadcast_strides(input: &[usize], output: &[usize]) -> Vec<usize> {
    let offset = output.len() - input.len();
    let mut strides = vec![0; output.len()];
    let mut stride = 1;
    for (i, &dim) in input.iter().enumerate().rev() {
        if dim != 1 {
            strides[offset + i] = stride;
        }
        stride *= dim;
    }
    strides
}

/// Resolve a possibly negative axis against `rank`.
pub fn normalize_axis(axis: i64, rank: usize) -> Result<usize> {
    let rank = rank as i64;
    let normalized = if axis < 0 { axis + rank } else { axis };
    if !(0..rank).contains(&normalized) {
        return Err(Error::Shape(format!(
            "Axis {axis} out of bounds for tensor with {rank} dimensions"
        )));
    }
    Ok(normalized as usize)
}

/// Narrow a shape quantity to the `u32` the shaders index with.
pub fn shader_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::DispatchTooLarge(value as u64))
}

/// Fail unless `view` holds f32 elements.
pub fn expect_f32(op: &str, view: &TensorView) -> Result<()> {
    if view.dtype != DataType::F32 {
        return Err(Error::Execution(format!(
            "{op} supports float32 inputs only, got {}",
            view.dtype
        )));
    }
    Ok(())
}
