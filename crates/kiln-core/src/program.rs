//! Program descriptors: what a kernel asks the backend to dispatch.

use crate::tensor::TensorView;
use crate::types::DataType;
use crate::{Error, Result};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Number of workgroups to dispatch along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchGroup {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchGroup {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// One-dimensional dispatch covering `elements` invocations with the
    /// given workgroup size.
    pub fn linear(elements: usize, workgroup_size: u32) -> Result<Self> {
        let groups = (elements as u64).div_ceil(workgroup_size as u64);
        let x = u32::try_from(groups).map_err(|_| Error::DispatchTooLarge(groups))?;
        Ok(Self::new(x, 1, 1))
    }

    /// Total number of workgroups.
    pub fn total(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

/// The part of a program known before its shader is generated.
///
/// This is everything needed to compute the program's cache signature,
/// so a cached artifact can be found without invoking a loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramMetadata {
    /// Program name (first component of the signature).
    pub name: String,

    /// Extra cache key material.
    ///
    /// Anything that changes the generated shader, its uniforms, or its
    /// outputs and is NOT derivable from the input dtypes and shapes must
    /// be encoded here (e.g. a normalized axis). Facts that do not affect
    /// the compiled program must stay out of it, or the cache fragments.
    pub cache_hint: Option<String>,

    /// Number of inputs the program binds.
    pub input_count: usize,
}

impl ProgramMetadata {
    pub fn new(name: impl Into<String>, input_count: usize) -> Self {
        Self {
            name: name.into(),
            cache_hint: None,
            input_count,
        }
    }

    pub fn with_cache_hint(mut self, hint: impl Into<String>) -> Self {
        self.cache_hint = Some(hint.into());
        self
    }
}

/// Declared output of a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramOutput {
    pub dims: Vec<usize>,
    pub dtype: DataType,
}

impl ProgramOutput {
    pub fn new(dims: &[usize], dtype: DataType) -> Self {
        Self {
            dims: dims.to_vec(),
            dtype,
        }
    }
}

/// Computes dispatch dimensions from the concrete inputs.
pub type DispatchGroupFn = Arc<dyn Fn(&[TensorView]) -> Result<DispatchGroup> + Send + Sync>;

/// A fully resolved program: shader, outputs, uniforms and dispatch shape.
///
/// Binding layout convention: inputs occupy bindings `0..n` (read-only
/// storage), outputs follow (read-write storage), and the uniform block,
/// when present, takes the last binding.
#[derive(Clone)]
pub struct ProgramInfo {
    pub metadata: ProgramMetadata,

    /// Declared outputs, in binding order.
    pub outputs: Vec<ProgramOutput>,

    /// WGSL source, preprocessed with `shader_defs` before compilation.
    pub shader_source: Cow<'static, str>,

    /// Shader definitions for `#ifdef` / `#{NAME}` substitution.
    pub shader_defs: HashMap<String, String>,

    /// Workgroup size, injected as `WORKGROUP_SIZE_X/Y/Z` shader defs.
    pub workgroup_size: [u32; 3],

    /// Entry point name.
    pub entry_point: Cow<'static, str>,

    /// Bytes of the uniform block (empty when the shader has none).
    pub uniforms: Vec<u8>,

    /// Dispatch shape function.
    pub dispatch_group: DispatchGroupFn,
}

impl ProgramInfo {
    /// Create a program with a single-axis workgroup of 64 invocations and a
    /// `main` entry point.
    pub fn new(
        metadata: ProgramMetadata,
        shader_source: impl Into<Cow<'static, str>>,
        outputs: Vec<ProgramOutput>,
        dispatch_group: impl Fn(&[TensorView]) -> Result<DispatchGroup> + Send + Sync + 'static,
    ) -> Self {
        Self {
            metadata,
            outputs,
            shader_source: shader_source.into(),
            shader_defs: HashMap::new(),
            workgroup_size: [64, 1, 1],
            entry_point: Cow::Borrowed("main"),
            uniforms: Vec::new(),
            dispatch_group: Arc::new(dispatch_group),
        }
    }

    pub fn with_workgroup_size(mut self, x: u32, y: u32, z: u32) -> Self {
        self.workgroup_size = [x, y, z];
        self
    }

    pub fn with_shader_def(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.shader_defs.insert(key.into(), value.to_string());
        self
    }

    /// Append u32 values to the uniform block.
    pub fn with_uniforms_u32(mut self, values: &[u32]) -> Self {
        for value in values {
            self.uniforms.extend_from_slice(&value.to_le_bytes());
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

impl fmt::Debug for ProgramInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramInfo")
            .field("metadata", &self.metadata)
            .field("outputs", &self.outputs)
            .field("workgroup_size", &self.workgroup_size)
            .field("entry_point", &self.entry_point)
            .field("uniforms", &self.uniforms.len())
            .finish_non_exhaustive()
    }
}

/// Loader producing the full program on a cache miss.
pub type ProgramLoader = Box<dyn FnOnce() -> Result<ProgramInfo>>;

/// A program handed to `run`: either ready, or deferred until the
/// cache proves it is needed.
pub enum ProgramSource {
    Ready(ProgramInfo),
    Deferred {
        metadata: ProgramMetadata,
        loader: ProgramLoader,
    },
}

impl ProgramSource {
    /// Defer shader generation to `loader`, which only runs on a cache miss.
    pub fn deferred(
        metadata: ProgramMetadata,
        loader: impl FnOnce() -> Result<ProgramInfo> + 'static,
    ) -> Self {
        ProgramSource::Deferred {
            metadata,
            loader: Box::new(loader),
        }
    }

    pub fn metadata(&self) -> &ProgramMetadata {
        match self {
            ProgramSource::Ready(info) => &info.metadata,
            ProgramSource::Deferred { metadata, .. } => metadata,
        }
    }

    /// Resolve the full program, invoking the loader if needed.
    pub fn load(self) -> Result<ProgramInfo> {
        match self {
            ProgramSource::Ready(info) => Ok(info),
            ProgramSource::Deferred { loader, .. } => loader(),
        }
    }
}

impl From<ProgramInfo> for ProgramSource {
    fn from(info: ProgramInfo) -> Self {
        ProgramSource::Ready(info)
    }
}

/// Who owns a buffer created for a program output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputOwnership {
    /// Released when the current kernel's compute call returns.
    Temporary,

    /// Owned by the current kernel until the kernel is released.
    Persistent,

    /// Statically unused: no buffer is created, no view is returned, and the
    /// output's binding slot stays empty.
    Placeholder,

    /// Kernel output at the given index, created by the caller's output factory.
    Kernel(usize),
}
