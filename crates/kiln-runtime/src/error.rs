//! Error types for the runtime crate.

use thiserror::Error;

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// GPU initialization failed.
    #[error("GPU initialization failed: {0}")]
    InitError(String),

    /// Reading profiler results failed.
    #[error("Profiler error: {0}")]
    ProfilerError(String),

    /// Mapping a buffer for reading failed.
    #[error("Buffer async error: {0}")]
    BufferAsyncError(#[from] wgpu::BufferAsyncError),

    #[error(transparent)]
    Core(#[from] kiln_core::Error),
}

/// Specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
