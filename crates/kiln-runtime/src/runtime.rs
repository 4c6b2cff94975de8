//! Runtime initialization and GPU device management.

use crate::config::RuntimeConfig;
use crate::device::WgpuDevice;
use crate::error::{Result, RuntimeError};
use kiln_backend::{Backend, BackendConfig};
use kiln_core::OpResolveRegistry;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Main entry point for GPU execution.
///
/// Owns the `wgpu` device and hands out [`Backend`]s that run kernels on it.
///
/// # Example
/// ```no_run
/// # use kiln_runtime::{Runtime, RuntimeConfig};
/// # use kiln_backend::BackendConfig;
/// # use std::sync::Arc;
/// #[pollster::main]
/// async fn main() -> anyhow::Result<()> {
///     let runtime = Runtime::new(RuntimeConfig::default()).await?;
///     let registry = Arc::new(kiln_operators::core_op_registry());
///     let backend = runtime.backend(registry, BackendConfig::default());
///     // Create kernels and compute...
///     Ok(())
/// }
/// ```
pub struct Runtime {
    device: Arc<WgpuDevice>,
    adapter_info: wgpu::AdapterInfo,
}

impl Runtime {
    /// Initialize the runtime with the preferred GPU adapter.
    ///
    /// # Errors
    /// Returns an error if no suitable GPU is found or initialization fails.
    pub async fn new(config: RuntimeConfig) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| {
                RuntimeError::InitError(format!("Failed to find suitable GPU adapter: {e}"))
            })?;

        Self::with_adapter(&adapter, config).await
    }

    /// Initialize the runtime with a specific GPU adapter.
    ///
    /// Half-precision shaders are enabled whenever the adapter supports them.
    /// Timestamp queries are requested only when profiling is on.
    ///
    /// # Errors
    /// Returns an error if device initialization fails.
    pub async fn with_adapter(adapter: &wgpu::Adapter, config: RuntimeConfig) -> Result<Self> {
        let adapter_info = adapter.get_info();
        let available = adapter.features();

        let mut required_features = wgpu::Features::empty();
        if available.contains(wgpu::Features::SHADER_F16) {
            required_features |= wgpu::Features::SHADER_F16;
        }
        if config.profiling {
            if available.contains(wgpu::Features::TIMESTAMP_QUERY) {
                required_features |= wgpu::Features::TIMESTAMP_QUERY;
            } else {
                warn!(
                    adapter = %adapter_info.name,
                    "Adapter lacks timestamp queries, pass profiling disabled"
                );
            }
        }

        // Request the adapter's limits; large models outgrow the WebGPU defaults
        let adapter_limits = adapter.limits();
        debug!(
            max_storage_buffer_binding_size = adapter_limits.max_storage_buffer_binding_size,
            max_buffer_size = adapter_limits.max_buffer_size,
            "Adapter reported limits"
        );
        let required_limits = adapter_limits;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("kiln device"),
                required_features,
                required_limits,
                ..Default::default()
            })
            .await
            .map_err(|e| RuntimeError::InitError(format!("Failed to create device: {e}")))?;

        let max_timestamp_passes = if required_features.contains(wgpu::Features::TIMESTAMP_QUERY) {
            config.max_timestamp_passes
        } else {
            0
        };

        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            features = ?required_features,
            "Initialized GPU device"
        );

        Ok(Self {
            device: Arc::new(WgpuDevice::new(
                device,
                queue,
                required_features,
                max_timestamp_passes,
            )),
            adapter_info,
        })
    }

    /// Get information about the GPU adapter.
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    pub fn device(&self) -> Arc<WgpuDevice> {
        Arc::clone(&self.device)
    }

    /// A backend running kernels from `registry` on this runtime's device.
    ///
    /// Backends created from one runtime share the device but not their
    /// buffers or program caches.
    pub fn backend(
        &self,
        registry: Arc<OpResolveRegistry>,
        config: BackendConfig,
    ) -> Backend<WgpuDevice> {
        Backend::new(Arc::clone(&self.device), registry, config)
    }
}
