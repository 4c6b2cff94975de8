//! Common test utilities for backend tests.
//!
//! Provides a small operator registry whose run functions exercise every
//! output-ownership regime, plus helpers to build a backend on a
//! `HeadlessDevice`.

#![allow(dead_code)]

use kiln_backend::{Backend, BackendConfig, HeadlessDevice};
use kiln_core::{
    AttributeValue, Attributes, BufferId, ComputeContext, DataType, DispatchGroup, Error,
    OpResolveRegistry, OpResolveRule, OutputOwnership, ProcessedAttribute, ProgramInfo,
    ProgramMetadata, ProgramOutput, ProgramSource, Result, TensorView,
};
use std::cell::Cell;
use std::sync::Arc;

pub const ADD_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(1) var<storage, read> b: array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;

@compute @workgroup_size(#{WORKGROUP_SIZE_X}, 1, 1)
fn main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
    @builtin(local_invocation_index) lid: u32,
) {
    let index = ((wid.z * nwg.y + wid.y) * nwg.x + wid.x) * #{WORKGROUP_SIZE_X}u + lid;
    if (index >= arrayLength(&output)) {
        return;
    }
    output[index] = a[index] + b[index];
}
"#;

pub const COPY_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> input: array<f32>;
@group(0) @binding(1) var<storage, read_write> output: array<f32>;

@compute @workgroup_size(#{WORKGROUP_SIZE_X}, 1, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= arrayLength(&output)) {
        return;
    }
    output[gid.x] = input[gid.x];
}
"#;

pub const SPLIT_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> input: array<f32>;
@group(0) @binding(1) var<storage, read_write> first: array<f32>;

@compute @workgroup_size(#{WORKGROUP_SIZE_X}, 1, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= arrayLength(&first)) {
        return;
    }
    first[gid.x] = input[gid.x];
}
"#;

pub const SCALE_SHADER: &str = r#"
struct Params {
    alpha: f32,
}

@group(0) @binding(0) var<storage, read> input: array<f32>;
@group(0) @binding(1) var<storage, read_write> output: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(#{WORKGROUP_SIZE_X}, 1, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= arrayLength(&output)) {
        return;
    }
    output[gid.x] = input[gid.x] * params.alpha;
}
"#;

thread_local! {
    /// Number of times a program loader ran on this thread.
    pub static LOADER_CALLS: Cell<usize> = const { Cell::new(0) };

    /// Number of times the Scale preprocessor ran on this thread.
    pub static PREPROCESS_CALLS: Cell<usize> = const { Cell::new(0) };

    /// Temporary buffer created by the most recent Accumulate or Fail call.
    pub static LAST_TEMPORARY: Cell<Option<BufferId>> = const { Cell::new(None) };
}

pub fn loader_calls() -> usize {
    LOADER_CALLS.with(Cell::get)
}

pub fn preprocess_calls() -> usize {
    PREPROCESS_CALLS.with(Cell::get)
}

pub fn last_temporary() -> Option<BufferId> {
    LAST_TEMPORARY.with(Cell::get)
}

fn copy_program(name: &str, input: &TensorView) -> ProgramInfo {
    ProgramInfo::new(
        ProgramMetadata::new(name, 1),
        COPY_SHADER,
        vec![ProgramOutput::new(&input.dims, input.dtype)],
        |inputs| DispatchGroup::linear(inputs[0].num_elements(), 64),
    )
}

/// Same-shape Add with a deferred program loader.
fn run_add(ctx: &mut ComputeContext<'_>, _attr: &ProcessedAttribute) -> Result<()> {
    let a = ctx.input(0)?.clone();
    let b = ctx.input(1)?.clone();
    if a.dims != b.dims {
        return Err(Error::Shape(format!(
            "Add expects equal shapes, got {:?} and {:?}",
            a.dims, b.dims
        )));
    }

    let metadata = ProgramMetadata::new("Add", 2);
    let dims = a.dims.clone();
    let dtype = a.dtype;
    let program = ProgramSource::deferred(metadata.clone(), move || {
        LOADER_CALLS.with(|calls| calls.set(calls.get() + 1));
        Ok(ProgramInfo::new(
            metadata,
            ADD_SHADER,
            vec![ProgramOutput::new(&dims, dtype)],
            |inputs| DispatchGroup::linear(inputs[0].num_elements(), 64),
        ))
    });

    ctx.compute(program, &[a, b], &[])?;
    Ok(())
}

/// Copies through a temporary scratch buffer and keeps a persistent state
/// buffer that is created on the first call only.
fn run_accumulate(ctx: &mut ComputeContext<'_>, _attr: &ProcessedAttribute) -> Result<()> {
    let x = ctx.input(0)?.clone();

    let scratch = ctx
        .compute(copy_program("Scratch", &x), &[x.clone()], &[OutputOwnership::Temporary])?
        .remove(0);
    LAST_TEMPORARY.with(|last| last.set(Some(scratch.buffer)));

    let existing = ctx.custom_data()?.get::<TensorView>("state").cloned();
    if existing.is_none() {
        let state = ctx
            .compute(copy_program("Init", &x), &[x.clone()], &[OutputOwnership::Persistent])?
            .remove(0);
        ctx.custom_data()?.insert("state", state);
    }

    ctx.compute(copy_program("Output", &x), &[scratch], &[OutputOwnership::Kernel(0)])?;
    Ok(())
}

/// Creates a temporary buffer, then fails.
fn run_fail(ctx: &mut ComputeContext<'_>, _attr: &ProcessedAttribute) -> Result<()> {
    let x = ctx.input(0)?.clone();
    let scratch = ctx
        .compute(copy_program("Scratch", &x), &[x], &[OutputOwnership::Temporary])?
        .remove(0);
    LAST_TEMPORARY.with(|last| last.set(Some(scratch.buffer)));
    Err(Error::Execution("intentional failure".to_string()))
}

/// Two declared outputs, the second one never bound.
fn run_split(ctx: &mut ComputeContext<'_>, _attr: &ProcessedAttribute) -> Result<()> {
    let x = ctx.input(0)?.clone();
    let program = ProgramInfo::new(
        ProgramMetadata::new("Split", 1),
        SPLIT_SHADER,
        vec![
            ProgramOutput::new(&x.dims, x.dtype),
            ProgramOutput::new(&x.dims, x.dtype),
        ],
        |inputs| DispatchGroup::linear(inputs[0].num_elements(), 64),
    );
    let views = ctx.compute(
        program,
        &[x],
        &[OutputOwnership::Kernel(0), OutputOwnership::Placeholder],
    )?;
    if views.len() != 1 {
        return Err(Error::Execution(format!("Expected 1 view, got {}", views.len())));
    }
    Ok(())
}

/// Typed attribute of Scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleAttr {
    pub alpha: f32,
}

fn parse_scale(raw: &Attributes) -> Result<ProcessedAttribute> {
    PREPROCESS_CALLS.with(|calls| calls.set(calls.get() + 1));
    Ok(ProcessedAttribute::new(ScaleAttr {
        alpha: raw.f32_or("alpha", 1.0)?,
    }))
}

fn run_scale(ctx: &mut ComputeContext<'_>, attr: &ProcessedAttribute) -> Result<()> {
    let alpha = attr.get::<ScaleAttr>()?.alpha;
    let x = ctx.input(0)?.clone();
    let program = ProgramInfo::new(
        ProgramMetadata::new("Scale", 1).with_cache_hint(format!("{alpha}")),
        SCALE_SHADER,
        vec![ProgramOutput::new(&x.dims, x.dtype)],
        |inputs| DispatchGroup::linear(inputs[0].num_elements(), 64),
    )
    .with_uniforms_u32(&[alpha.to_bits()]);
    ctx.compute(program, &[x], &[])?;
    Ok(())
}

pub fn test_registry() -> OpResolveRegistry {
    let mut registry = OpResolveRegistry::new();
    registry
        .register("Add", OpResolveRule::new(run_add))
        .register("Accumulate", OpResolveRule::new(run_accumulate))
        .register("Fail", OpResolveRule::new(run_fail))
        .register("Split", OpResolveRule::new(run_split))
        .register("Scale", OpResolveRule::with_preprocess(run_scale, parse_scale));
    registry
}

/// Route backend logs to the test harness. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Build a backend over a fresh headless device and reset the per-thread
/// counters.
pub fn make_backend(config: BackendConfig) -> (Arc<HeadlessDevice>, Backend<HeadlessDevice>) {
    init_tracing();
    LOADER_CALLS.with(|calls| calls.set(0));
    PREPROCESS_CALLS.with(|calls| calls.set(0));
    LAST_TEMPORARY.with(|last| last.set(None));

    let device = Arc::new(HeadlessDevice::default());
    let backend = Backend::new(Arc::clone(&device), Arc::new(test_registry()), config);
    (device, backend)
}

/// Allocate and upload an f32 tensor.
pub fn upload_f32(
    backend: &mut Backend<HeadlessDevice>,
    values: &[f32],
    dims: &[usize],
) -> TensorView {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    let id = backend
        .alloc(bytes.len() as u64)
        .expect("Allocation should succeed");
    backend.upload(id, &bytes).expect("Upload should succeed");
    TensorView::new(id, DataType::F32, dims)
}

/// An f32 tensor of the given shape filled with zeros.
pub fn zeros(backend: &mut Backend<HeadlessDevice>, dims: &[usize]) -> TensorView {
    let count: usize = dims.iter().product();
    upload_f32(backend, &vec![0.0; count], dims)
}

pub fn alpha(value: f32) -> Attributes {
    Attributes::new().with("alpha", AttributeValue::Float(value))
}
