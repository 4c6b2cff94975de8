//! The device seam between the backend and a graphics API.
//!
//! The backend never talks to a graphics API directly. Everything it needs
//! from the device (buffers, command recording, pipelines, error scopes) goes
//! through [`GpuDevice`], so the same orchestration logic runs on `wgpu` or on
//! a host-memory device in tests.

use crate::Result;
use crate::program::DispatchGroup;
use futures::future::LocalBoxFuture;
use std::fmt;
use std::hash::Hash;

/// Resolves to a validation error message if the scope captured one.
pub type ValidationFuture = LocalBoxFuture<'static, Option<String>>;

/// Resolves to the contents of a mapped readback buffer.
pub type ReadbackFuture = LocalBoxFuture<'static, Result<Vec<u8>>>;

/// Device limits the backend needs to respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_compute_workgroups_per_dimension: u32,
    pub max_storage_buffer_binding_size: u64,
    pub max_buffer_size: u64,
}

impl Default for DeviceLimits {
    /// WebGPU default limits.
    fn default() -> Self {
        Self {
            max_compute_workgroups_per_dimension: 65535,
            max_storage_buffer_binding_size: 128 << 20,
            max_buffer_size: 256 << 20,
        }
    }
}

/// Optional capabilities negotiated at device creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Half-precision floats in shaders.
    pub shader_f16: bool,

    /// Timestamp queries for pass-level profiling.
    pub timestamp_query: bool,
}

/// What a buffer is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Storage buffer that can be copied to and from.
    Storage,

    /// Host-written staging buffer used as a copy source.
    Upload,

    /// Host-readable staging buffer used as a copy destination.
    Readback,
}

/// Buffers bound to one dispatch, in binding order.
///
/// Inputs take bindings `0..inputs.len()`, outputs follow. A `None` output is
/// a placeholder: its binding slot is left unbound and the shader must not use
/// it. The uniform block, if any, takes the binding after the last output slot.
#[derive(Debug)]
pub struct DispatchBindings<'a, B> {
    pub inputs: &'a [B],
    pub outputs: &'a [Option<B>],
    /// Uniform block bytes; empty means no uniform binding.
    pub uniforms: &'a [u8],
}

impl<B> DispatchBindings<'_, B> {
    /// Binding index of the uniform block.
    pub fn uniform_binding(&self) -> u32 {
        (self.inputs.len() + self.outputs.len()) as u32
    }
}

/// A GPU device and its queue.
pub trait GpuDevice {
    /// Device buffer handle. Cloning must not copy the buffer, and equality
    /// must compare buffer identity.
    type Buffer: Clone + Eq + Hash + fmt::Debug;

    /// Compiled compute pipeline.
    type Pipeline: Send + Sync + 'static;

    /// Open command recording context.
    type Encoder;

    /// Open compute pass.
    type Pass;

    /// Token for an open validation error scope.
    type ErrorScope;

    fn limits(&self) -> &DeviceLimits;

    fn capabilities(&self) -> DeviceCapabilities;

    /// Create an uninitialized buffer of `size` bytes.
    fn create_buffer(&self, size: u64, usage: BufferUsage) -> Self::Buffer;

    /// Create a buffer holding `contents`.
    fn create_buffer_init(&self, contents: &[u8], usage: BufferUsage) -> Self::Buffer;

    fn destroy_buffer(&self, buffer: &Self::Buffer);

    fn buffer_size(&self, buffer: &Self::Buffer) -> u64;

    fn create_command_encoder(&self) -> Self::Encoder;

    fn begin_compute_pass(&self, encoder: &mut Self::Encoder) -> Self::Pass;

    fn end_compute_pass(&self, pass: Self::Pass);

    /// Record a buffer-to-buffer copy. No compute pass may be open.
    fn copy_buffer(
        &self,
        encoder: &mut Self::Encoder,
        source: &Self::Buffer,
        destination: &Self::Buffer,
        size: u64,
    );

    /// Submit a finished encoder to the queue.
    fn submit(&self, encoder: Self::Encoder);

    /// Map a readback buffer and copy out its first `size` bytes.
    ///
    /// The buffer's copy must already be submitted.
    fn read_buffer(&self, buffer: &Self::Buffer, size: u64) -> ReadbackFuture;

    /// Compile WGSL into a compute pipeline.
    fn create_pipeline(&self, label: &str, wgsl: &str, entry_point: &str)
    -> Result<Self::Pipeline>;

    /// Record one dispatch into an open compute pass.
    fn dispatch(
        &self,
        pass: &mut Self::Pass,
        pipeline: &Self::Pipeline,
        bindings: &DispatchBindings<'_, Self::Buffer>,
        groups: DispatchGroup,
    );

    /// Start capturing validation errors.
    fn push_validation_scope(&self) -> Self::ErrorScope;

    /// Stop capturing; the result arrives asynchronously.
    fn pop_validation_scope(&self, scope: Self::ErrorScope) -> ValidationFuture;
}
