//! GPU runtime for kiln.
//!
//! Connects the kiln backend to a real GPU through `wgpu`:
//! - [`Runtime`] picks an adapter, negotiates features and limits and
//!   creates the device
//! - [`WgpuDevice`] implements [`kiln_core::GpuDevice`] on top of it
//! - [`PassProfiler`] times compute passes with timestamp queries
//!
//! # Example
//!
//! ```no_run
//! use kiln_backend::{BackendConfig, ErrorSink, SimpleKernelIo};
//! use kiln_core::{Attributes, DataType, KernelId, TensorView};
//! use kiln_runtime::{Runtime, RuntimeConfig};
//! use std::sync::Arc;
//!
//! # #[pollster::main]
//! # async fn main() -> anyhow::Result<()> {
//! let runtime = Runtime::new(RuntimeConfig::default()).await?;
//! let mut backend = runtime.backend(
//!     Arc::new(kiln_operators::core_op_registry()),
//!     BackendConfig::default(),
//! );
//! backend.create_kernel("Relu", KernelId(1), Attributes::new(), "relu")?;
//! let data: Vec<u8> = [-1.0f32, 2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
//! let id = backend.alloc(data.len() as u64)?;
//! backend.upload(id, &data)?;
//! let input = TensorView::new(id, DataType::F32, &[2]);
//!
//! let mut io = SimpleKernelIo::new(vec![input], 1);
//! let mut errors = ErrorSink::new();
//! backend.compute_kernel(KernelId(1), &mut io, &mut errors)?;
//! backend.flush();
//! errors.resolve_pending().await;
//! let output = backend.download(io.output(0).unwrap().buffer).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod device;
mod error;
mod profiler;
mod runtime;

pub use config::RuntimeConfig;
pub use device::{WgpuDevice, WgpuPass, WgpuPipeline};
pub use error::{Result, RuntimeError};
pub use profiler::{PassProfiler, PassTiming};
pub use runtime::Runtime;
