//! Kernel execution orchestrator for kiln.
//!
//! The [`Backend`] sits between a graph executor, which decides which
//! operator runs on which tensors, and a [`GpuDevice`](kiln_core::GpuDevice),
//! which executes submitted commands. It owns:
//! 1. **Kernels** - created from the op-resolve registry, run one at a time
//! 2. **Buffers** - temporary, persistent, caller-owned and external regimes
//! 3. **Programs** - compiled pipelines cached by signature
//! 4. **Batching** - dispatches accumulate until flushed
//!
//! [`HeadlessDevice`] runs all of this in host memory, without a GPU.

mod backend;
mod batch;
mod buffer_manager;
mod config;
mod error_sink;
pub mod headless;
mod kernel_io;
mod program_manager;

pub use backend::{Backend, KernelStatus, KernelTiming};
pub use batch::CommandBatch;
pub use buffer_manager::{BUFFER_ALIGNMENT, GpuDataManager, normalize_size};
pub use config::BackendConfig;
pub use error_sink::{ErrorSink, FailureKind, KernelFailure, PendingValidation};
pub use headless::HeadlessDevice;
pub use kernel_io::SimpleKernelIo;
pub use program_manager::{ProgramArtifact, ProgramManager};
