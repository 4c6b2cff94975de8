//! Unary elementwise operator family.
//!
//! Covers: Neg, Sqrt, Relu, Tanh, Sigmoid

use kiln_core::{
    ComputeContext, DispatchGroup, ProcessedAttribute, ProgramInfo, ProgramMetadata,
    ProgramOutput, Result, TensorView,
};

use crate::WORKGROUP_SIZE;
use crate::helpers::{expect_f32, shader_u32};

const UNARY_SHADER: &str = include_str!("../../shaders/elementwise/unary.wgsl");

/// Unary elementwise operator family.
///
/// Output shape equals input shape; members differ only in the `OP_*`
/// shader definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnaryElementwiseOp {
    name: &'static str,
    op_def: &'static str,
}

impl UnaryElementwiseOp {
    pub fn neg() -> Self {
        Self {
            name: "Neg",
            op_def: "OP_NEG",
        }
    }

    pub fn sqrt() -> Self {
        Self {
            name: "Sqrt",
            op_def: "OP_SQRT",
        }
    }

    pub fn relu() -> Self {
        Self {
            name: "Relu",
            op_def: "OP_RELU",
        }
    }

    pub fn tanh() -> Self {
        Self {
            name: "Tanh",
            op_def: "OP_TANH",
        }
    }

    pub fn sigmoid() -> Self {
        Self {
            name: "Sigmoid",
            op_def: "OP_SIGMOID",
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn program(&self, input: &TensorView) -> Result<ProgramInfo> {
        expect_f32(self.name, input)?;
        let count = input.num_elements();
        let uniforms = [shader_u32(count)?];

        Ok(ProgramInfo::new(
            ProgramMetadata::new(self.name, 1),
            UNARY_SHADER,
            vec![ProgramOutput::new(&input.dims, input.dtype)],
            move |_| DispatchGroup::linear(count, WORKGROUP_SIZE),
        )
        .with_shader_def(self.op_def, true)
        .with_uniforms_u32(&uniforms))
    }

    pub fn run(self, ctx: &mut ComputeContext<'_>) -> Result<()> {
        let input = ctx.input(0)?.clone();
        let program = self.program(&input)?;
        ctx.compute(program, &[input], &[])?;
        Ok(())
    }
}

pub fn run_neg(ctx: &mut ComputeContext<'_>, _attr: &ProcessedAttribute) -> Result<()> {
    UnaryElementwiseOp::neg().run(ctx)
}

pub fn run_sqrt(ctx: &mut ComputeContext<'_>, _attr: &ProcessedAttribute) -> Result<()> {
    UnaryElementwiseOp::sqrt().run(ctx)
}

pub fn run_relu(ctx: &mut ComputeContext<'_>, _attr: &ProcessedAttribute) -> Result<()> {
    UnaryElementwiseOp::relu().run(ctx)
}

pub fn run_tanh(ctx: &mut ComputeContext<'_>, _attr: &ProcessedAttribute) -> Result<()> {
    UnaryElementwiseOp::tanh().run(ctx)
}

pub fn run_sigmoid(ctx: &mut ComputeContext<'_>, _attr: &ProcessedAttribute) -> Result<()> {
    UnaryElementwiseOp::sigmoid().run(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{BufferId, DataType, preprocess_wgsl};

    #[test]
    fn test_every_member_compiles() {
        let input = TensorView::new(BufferId(0), DataType::F32, &[3, 5]);
        for op in [
            UnaryElementwiseOp::neg(),
            UnaryElementwiseOp::sqrt(),
            UnaryElementwiseOp::relu(),
            UnaryElementwiseOp::tanh(),
            UnaryElementwiseOp::sigmoid(),
        ] {
            let program = op.program(&input).unwrap();
            assert_eq!(program.uniforms, 15u32.to_le_bytes().to_vec());

            let mut defines = program.shader_defs.clone();
            defines.insert("WORKGROUP_SIZE_X".to_string(), "64".to_string());
            preprocess_wgsl(op.name(), &program.shader_source, &defines)
                .unwrap_or_else(|e| panic!("{} failed to compile: {e}", op.name()));
        }
    }

    #[test]
    fn test_rejects_integer_input() {
        let input = TensorView::new(BufferId(0), DataType::I32, &[4]);
        assert!(UnaryElementwiseOp::relu().program(&input).is_err());
    }
}
