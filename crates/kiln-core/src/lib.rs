//! Core types, device seam, and kernel traits for kiln.
//!
//! This crate provides the vocabulary shared by every other kiln crate:
//! - Tensor views over GPU buffers (`TensorView`, `BufferId`)
//! - Program descriptors and their cache signature (`ProgramInfo`, `ProgramSignature`)
//! - The `GpuDevice` trait that hides the graphics API from the backend
//! - Kernel-side traits (`ComputeContext`, `KernelIo`, `ProgramRunner`)
//! - The op-resolve registry mapping operator types to run functions

pub mod attribute;
pub mod device;
pub mod kernel;
pub mod program;
pub mod registry;
pub mod shader;
pub mod signature;
pub mod tensor;
pub mod types;

// Re-export commonly used types
pub use attribute::{AttributeValue, Attributes};
pub use device::{
    BufferUsage, DeviceCapabilities, DeviceLimits, DispatchBindings, GpuDevice, ReadbackFuture,
    ValidationFuture,
};
pub use kernel::{
    BufferAllocator, ComputeContext, KernelAttribute, KernelCustomData, KernelId, KernelIo,
    ProcessedAttribute, ProgramRunner,
};
pub use program::{
    DispatchGroup, OutputOwnership, ProgramInfo, ProgramMetadata, ProgramOutput, ProgramSource,
};
pub use shader::preprocess_wgsl;
pub use registry::{OpResolveRegistry, OpResolveRule, PreprocessFn, RunFn};
pub use signature::ProgramSignature;
pub use tensor::{BufferId, SessionId, TensorView};
pub use types::DataType;

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type shared by the backend, operators and runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unimplemented operator: {0}")]
    UnimplementedOperator(String),

    #[error("Kernel {0} not found")]
    KernelNotFound(KernelId),

    #[error("Kernel {0} already exists")]
    KernelAlreadyExists(KernelId),

    #[error("No kernel is currently running")]
    NoActiveKernel,

    #[error("Kernel {requested} cannot run while kernel {active} is active")]
    ReentrantKernelCall { active: KernelId, requested: KernelId },

    #[error("Program '{program}' expects {expected} inputs, got {actual}")]
    ArityMismatch {
        program: String,
        expected: usize,
        actual: usize,
    },

    #[error("Program '{program}' declares {expected} outputs, got {actual} output directives")]
    OutputArityMismatch {
        program: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid output index {index} (kernel has {output_count} outputs)")]
    InvalidOutputIndex { index: usize, output_count: usize },

    #[error("No GPU buffer for {0}")]
    MissingBuffer(BufferId),

    #[error("Buffer size mismatch: source is {source_size} bytes, destination is {destination_size} bytes")]
    BufferSizeMismatch {
        source_size: u64,
        destination_size: u64,
    },

    #[error("Dispatch of {0} workgroups exceeds the device limit")]
    DispatchTooLarge(u64),

    #[error("Shader compilation error: {0}")]
    ShaderCompilation(String),

    #[error("Attribute error: {0}")]
    Attribute(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Device error: {0}")]
    Device(String),
}
