//! Binary elementwise operator family.
//!
//! Covers: Add, Sub, Mul, Div

use kiln_core::{
    ComputeContext, DataType, DispatchGroup, Error, ProcessedAttribute, ProgramInfo,
    ProgramMetadata, ProgramOutput, ProgramSource, Result, TensorView,
};
use tracing::trace;

use crate::WORKGROUP_SIZE;
use crate::helpers::{broadcast_shapes, broadcast_strides, expect_f32, shader_u32};

const BINARY_SHADER: &str = include_str!("../../shaders/elementwise/binary.wgsl");

/// Highest output rank the broadcast shader can index.
pub const MAX_BROADCAST_RANK: usize = 8;

/// Binary elementwise operator family.
///
/// All members share the same structure:
/// - NumPy-style broadcasting of the two inputs
/// - One dispatch over the output elements
/// - Broadcast dims and strides passed in the uniform block
///
/// The only difference is the `OP_*` shader definition that picks the
/// arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryElementwiseOp {
    name: &'static str,
    op_def: &'static str,
}

impl BinaryElementwiseOp {
    pub fn add() -> Self {
        Self {
            name: "Add",
            op_def: "OP_ADD",
        }
    }

    pub fn sub() -> Self {
        Self {
            name: "Sub",
            op_def: "OP_SUB",
        }
    }

    pub fn mul() -> Self {
        Self {
            name: "Mul",
            op_def: "OP_MUL",
        }
    }

    pub fn div() -> Self {
        Self {
            name: "Div",
            op_def: "OP_DIV",
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Build the program computing `a <op> b`.
    pub fn program(&self, a: &TensorView, b: &TensorView) -> Result<ProgramInfo> {
        expect_f32(self.name, a)?;
        expect_f32(self.name, b)?;

        let dims = broadcast_shapes(&[&a.dims, &b.dims])?;
        if dims.len() > MAX_BROADCAST_RANK {
            return Err(Error::Shape(format!(
                "{} supports up to {MAX_BROADCAST_RANK} dimensions, got {}",
                self.name,
                dims.len()
            )));
        }
        let count: usize = dims.iter().product();

        // Must match `Params` in binary.wgsl
        let mut uniforms = vec![shader_u32(count)?, dims.len() as u32, 0, 0];
        for values in [
            dims.clone(),
            broadcast_strides(&a.dims, &dims),
            broadcast_strides(&b.dims, &dims),
        ] {
            let mut packed = [0u32; MAX_BROADCAST_RANK];
            for (slot, value) in packed.iter_mut().zip(values) {
                *slot = shader_u32(value)?;
            }
            uniforms.extend_from_slice(&packed);
        }

        trace!(op = self.name, ?dims, "Generating binary program");
        Ok(ProgramInfo::new(
            ProgramMetadata::new(self.name, 2),
            BINARY_SHADER,
            vec![ProgramOutput::new(&dims, DataType::F32)],
            move |_| DispatchGroup::linear(count, WORKGROUP_SIZE),
        )
        .with_shader_def(self.op_def, true)
        .with_uniforms_u32(&uniforms))
    }

    /// Dispatch the operator; the program is only generated on a cache miss.
    pub fn run(self, ctx: &mut ComputeContext<'_>) -> Result<()> {
        let a = ctx.input(0)?.clone();
        let b = ctx.input(1)?.clone();

        let metadata = ProgramMetadata::new(self.name, 2);
        let (lhs, rhs) = (a.clone(), b.clone());
        let program = ProgramSource::deferred(metadata, move || self.program(&lhs, &rhs));

        ctx.compute(program, &[a, b], &[])?;
        Ok(())
    }
}

pub fn run_add(ctx: &mut ComputeContext<'_>, _attr: &ProcessedAttribute) -> Result<()> {
    BinaryElementwiseOp::add().run(ctx)
}

pub fn run_sub(ctx: &mut ComputeContext<'_>, _attr: &ProcessedAttribute) -> Result<()> {
    BinaryElementwiseOp::sub().run(ctx)
}

pub fn run_mul(ctx: &mut ComputeContext<'_>, _attr: &ProcessedAttribute) -> Result<()> {
    BinaryElementwiseOp::mul().run(ctx)
}

pub fn run_div(ctx: &mut ComputeContext<'_>, _attr: &ProcessedAttribute) -> Result<()> {
    BinaryElementwiseOp::div().run(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{BufferId, preprocess_wgsl};
    use std::collections::HashMap;

    fn view(dims: &[usize]) -> TensorView {
        TensorView::new(BufferId(0), DataType::F32, dims)
    }

    fn words(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    #[test]
    fn test_broadcast_uniforms() {
        let program = BinaryElementwiseOp::add()
            .program(&view(&[2, 3]), &view(&[3]))
            .unwrap();

        assert_eq!(program.outputs[0].dims, vec![2, 3]);
        let uniforms = words(&program.uniforms);
        assert_eq!(uniforms.len(), 4 + 3 * MAX_BROADCAST_RANK);
        assert_eq!(&uniforms[..4], &[6, 2, 0, 0]);
        assert_eq!(&uniforms[4..6], &[2, 3]);
        assert_eq!(&uniforms[12..14], &[3, 1]);
        assert_eq!(&uniforms[20..22], &[0, 1]);
        assert_eq!((program.dispatch_group)(&[]).unwrap(), DispatchGroup::new(1, 1, 1));
    }

    #[test]
    fn test_rank_limit() {
        let dims = [1; MAX_BROADCAST_RANK + 1];
        let err = BinaryElementwiseOp::mul()
            .program(&view(&dims), &view(&[1]))
            .unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
    }

    #[test]
    fn test_every_member_compiles() {
        for op in [
            BinaryElementwiseOp::add(),
            BinaryElementwiseOp::sub(),
            BinaryElementwiseOp::mul(),
            BinaryElementwiseOp::div(),
        ] {
            let program = op.program(&view(&[4]), &view(&[4])).unwrap();
            let mut defines: HashMap<String, String> = program.shader_defs.clone();
            defines.insert("WORKGROUP_SIZE_X".to_string(), "64".to_string());

            let wgsl = preprocess_wgsl(op.name(), &program.shader_source, &defines)
                .unwrap_or_else(|e| panic!("{} failed to compile: {e}", op.name()));
            assert!(wgsl.contains("fn main"));
        }
    }
}
