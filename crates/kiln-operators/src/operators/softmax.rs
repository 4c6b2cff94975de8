//! Softmax operator implementation.
//!
//! Converts a vector of real values into a probability distribution using
//! the softmax function with numerical stability via the max-trick.

use kiln_core::{
    Attributes, ComputeContext, DataType, DispatchGroup, Error, OutputOwnership,
    ProcessedAttribute, ProgramInfo, ProgramMetadata, ProgramOutput, Result, TensorView,
};

use crate::WORKGROUP_SIZE;
use crate::helpers::{expect_f32, normalize_axis, shader_u32};

const SOFTMAX_STATS_SHADER: &str = include_str!("../../shaders/softmax/stats.wgsl");
const SOFTMAX_NORMALIZE_SHADER: &str = include_str!("../../shaders/softmax/normalize.wgsl");

/// Typed Softmax attribute.
///
/// `axis` defaults to -1 (last axis); negative values wrap around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftmaxAttr {
    pub axis: i64,
}

pub fn parse_softmax(raw: &Attributes) -> Result<ProcessedAttribute> {
    Ok(ProcessedAttribute::new(SoftmaxAttr {
        axis: raw.i64_or("axis", -1)?,
    }))
}

/// The input viewed as `[outer, axis_size, inner]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SoftmaxLayout {
    axis: usize,
    outer: usize,
    axis_size: usize,
    inner: usize,
}

impl SoftmaxLayout {
    fn new(dims: &[usize], axis: usize) -> Self {
        Self {
            axis,
            outer: dims[..axis].iter().product(),
            axis_size: dims[axis],
            inner: dims[axis + 1..].iter().product(),
        }
    }

    fn rows(&self) -> usize {
        self.outer * self.inner
    }

    fn elements(&self) -> usize {
        self.rows() * self.axis_size
    }

    /// Must match `Params` in both softmax shaders.
    fn uniforms(&self) -> Result<[u32; 4]> {
        Ok([
            shader_u32(self.outer)?,
            shader_u32(self.axis_size)?,
            shader_u32(self.inner)?,
            0,
        ])
    }

    fn metadata(&self, name: &str, input_count: usize) -> ProgramMetadata {
        ProgramMetadata::new(name, input_count).with_cache_hint(self.axis.to_string())
    }
}

/// Pass 1: one `(max, sum)` pair per row.
fn stats_program(layout: SoftmaxLayout) -> Result<ProgramInfo> {
    // An empty axis leaves nothing to normalize
    let rows = if layout.elements() == 0 { 0 } else { layout.rows() };
    Ok(ProgramInfo::new(
        layout.metadata("SoftmaxStats", 1),
        SOFTMAX_STATS_SHADER,
        vec![ProgramOutput::new(&[layout.rows(), 2], DataType::F32)],
        move |_| DispatchGroup::linear(rows, WORKGROUP_SIZE),
    )
    .with_uniforms_u32(&layout.uniforms()?))
}

/// Pass 2: `exp(x - max) / sum` for every element.
fn normalize_program(layout: SoftmaxLayout, input: &TensorView) -> Result<ProgramInfo> {
    let elements = layout.elements();
    Ok(ProgramInfo::new(
        layout.metadata("SoftmaxNormalize", 2),
        SOFTMAX_NORMALIZE_SHADER,
        vec![ProgramOutput::new(&input.dims, input.dtype)],
        move |_| DispatchGroup::linear(elements, WORKGROUP_SIZE),
    )
    .with_uniforms_u32(&layout.uniforms()?))
}

/// Softmax along one axis, in two dispatches.
///
/// The row statistics live in a temporary buffer that is released when the
/// compute call returns.
pub fn run_softmax(ctx: &mut ComputeContext<'_>, attr: &ProcessedAttribute) -> Result<()> {
    let SoftmaxAttr { axis } = *attr.get::<SoftmaxAttr>()?;
    let input = ctx.input(0)?.clone();
    expect_f32("Softmax", &input)?;

    let layout = SoftmaxLayout::new(&input.dims, normalize_axis(axis, input.rank())?);

    let stats = ctx
        .compute(
            stats_program(layout)?,
            &[input.clone()],
            &[OutputOwnership::Temporary],
        )?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Execution("Softmax statistics were not created".to_string()))?;

    ctx.compute(
        normalize_program(layout, &input)?,
        &[input, stats],
        &[OutputOwnership::Kernel(0)],
    )?;
    Ok(())
}
