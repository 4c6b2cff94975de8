//! `wgpu` implementation of [`GpuDevice`].

use crate::error::Result as RuntimeResult;
use crate::profiler::{PassProfiler, PassTiming};
use futures::FutureExt;
use kiln_core::{
    BufferUsage, DeviceCapabilities, DeviceLimits, DispatchBindings, DispatchGroup, Error,
    GpuDevice, ReadbackFuture, Result, ValidationFuture,
};
use std::borrow::Cow;
use tracing::{debug, trace};
use wgpu::util::DeviceExt;

/// Uniform blocks are padded to this size.
const UNIFORM_ALIGNMENT: usize = 16;

/// Compiled compute pipeline and the label it was built under.
#[derive(Debug, Clone)]
pub struct WgpuPipeline {
    pub label: String,
    pub pipeline: wgpu::ComputePipeline,
}

/// Open compute pass.
pub struct WgpuPass {
    pass: wgpu::ComputePass<'static>,
    /// Profiler slot of this pass, if it is timed.
    timed: Option<u32>,
}

/// A `wgpu` device and queue.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: DeviceLimits,
    capabilities: DeviceCapabilities,
    profiler: Option<PassProfiler>,
}

impl WgpuDevice {
    /// Wrap an already created device.
    ///
    /// `features` are the features the device was created with. Pass-level
    /// profiling needs [`wgpu::Features::TIMESTAMP_QUERY`]; `max_timestamp_passes`
    /// of 0 disables it.
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        features: wgpu::Features,
        max_timestamp_passes: u32,
    ) -> Self {
        let wgpu_limits = device.limits();
        let limits = DeviceLimits {
            max_compute_workgroups_per_dimension: wgpu_limits.max_compute_workgroups_per_dimension,
            max_storage_buffer_binding_size: wgpu_limits.max_storage_buffer_binding_size as u64,
            max_buffer_size: wgpu_limits.max_buffer_size,
        };
        let capabilities = DeviceCapabilities {
            shader_f16: features.contains(wgpu::Features::SHADER_F16),
            timestamp_query: features.contains(wgpu::Features::TIMESTAMP_QUERY),
        };
        let profiler = (capabilities.timestamp_query && max_timestamp_passes > 0)
            .then(|| PassProfiler::new(&device, max_timestamp_passes));

        debug!(?limits, ?capabilities, profiling = profiler.is_some(), "Created wgpu device");
        Self {
            device,
            queue,
            limits,
            capabilities,
            profiler,
        }
    }

    pub fn wgpu_device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn is_profiling(&self) -> bool {
        self.profiler.is_some()
    }

    /// GPU time of every compute pass submitted since the last call.
    ///
    /// Empty when profiling is off.
    pub async fn read_pass_timings(&self) -> RuntimeResult<Vec<PassTiming>> {
        match &self.profiler {
            Some(profiler) => {
                profiler
                    .read(&self.device, self.queue.get_timestamp_period())
                    .await
            }
            None => Ok(Vec::new()),
        }
    }

    fn usages(usage: BufferUsage) -> wgpu::BufferUsages {
        match usage {
            BufferUsage::Storage => {
                wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST
            }
            BufferUsage::Upload => wgpu::BufferUsages::COPY_SRC,
            BufferUsage::Readback => wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        }
    }
}

impl GpuDevice for WgpuDevice {
    type Buffer = wgpu::Buffer;
    type Pipeline = WgpuPipeline;
    type Encoder = wgpu::CommandEncoder;
    type Pass = WgpuPass;
    type ErrorScope = wgpu::ErrorScopeGuard;

    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn create_buffer(&self, size: u64, usage: BufferUsage) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kiln buffer"),
            size,
            usage: Self::usages(usage),
            mapped_at_creation: false,
        })
    }

    fn create_buffer_init(&self, contents: &[u8], usage: BufferUsage) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("kiln buffer"),
                contents,
                usage: Self::usages(usage),
            })
    }

    fn destroy_buffer(&self, buffer: &wgpu::Buffer) {
        buffer.destroy();
    }

    fn buffer_size(&self, buffer: &wgpu::Buffer) -> u64 {
        buffer.size()
    }

    fn create_command_encoder(&self) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kiln batch"),
            })
    }

    fn begin_compute_pass(&self, encoder: &mut wgpu::CommandEncoder) -> WgpuPass {
        let timed = self
            .profiler
            .as_ref()
            .and_then(|profiler| profiler.reserve_pass().map(|slot| (profiler, slot)));

        let pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("kiln compute"),
            timestamp_writes: timed.map(|(profiler, slot)| profiler.timestamp_writes(slot)),
        });

        WgpuPass {
            pass: pass.forget_lifetime(),
            timed: timed.map(|(_, slot)| slot),
        }
    }

    fn end_compute_pass(&self, pass: WgpuPass) {
        drop(pass);
    }

    fn copy_buffer(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::Buffer,
        destination: &wgpu::Buffer,
        size: u64,
    ) {
        encoder.copy_buffer_to_buffer(source, 0, destination, 0, size);
    }

    fn submit(&self, mut encoder: wgpu::CommandEncoder) {
        if let Some(profiler) = &self.profiler {
            profiler.resolve(&mut encoder);
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn read_buffer(&self, buffer: &wgpu::Buffer, size: u64) -> ReadbackFuture {
        let buffer = buffer.clone();
        let device = self.device.clone();

        async move {
            if size == 0 {
                return Ok(Vec::new());
            }

            let slice = buffer.slice(..);
            let (sender, receiver) = futures::channel::oneshot::channel();
            slice.map_async(wgpu::MapMode::Read, move |result| {
                sender.send(result).ok();
            });

            device
                .poll(wgpu::PollType::wait_indefinitely())
                .map_err(|e| Error::Device(format!("GPU poll failed during download: {e}")))?;
            receiver
                .await
                .map_err(|_| Error::Device("Map callback dropped".to_string()))?
                .map_err(|e| Error::Device(format!("Map failed: {e}")))?;

            let data = slice.get_mapped_range()[..size as usize].to_vec();
            buffer.unmap();
            Ok(data)
        }
        .boxed_local()
    }

    fn create_pipeline(&self, label: &str, wgsl: &str, entry_point: &str) -> Result<WgpuPipeline> {
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(wgsl)),
            });

        // Auto layout: one bind group, bindings exactly as the shader declares them
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: None,
                module: &module,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            });

        if let Some(error) = futures::executor::block_on(scope.pop()) {
            return Err(Error::ShaderCompilation(format!(
                "Pipeline creation failed for '{label}': {error}"
            )));
        }

        trace!(label, entry_point, "Created compute pipeline");
        Ok(WgpuPipeline {
            label: label.to_string(),
            pipeline,
        })
    }

    fn dispatch(
        &self,
        pass: &mut WgpuPass,
        pipeline: &WgpuPipeline,
        bindings: &DispatchBindings<'_, wgpu::Buffer>,
        groups: DispatchGroup,
    ) {
        let uniforms = (!bindings.uniforms.is_empty()).then(|| {
            let mut contents = bindings.uniforms.to_vec();
            contents.resize(contents.len().next_multiple_of(UNIFORM_ALIGNMENT), 0);
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("kiln uniforms"),
                    contents: &contents,
                    usage: wgpu::BufferUsages::UNIFORM,
                })
        });

        let mut entries: Vec<wgpu::BindGroupEntry<'_>> = bindings
            .inputs
            .iter()
            .enumerate()
            .map(|(i, buffer)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        // Placeholder outputs leave their slot unbound
        for (i, output) in bindings.outputs.iter().enumerate() {
            if let Some(buffer) = output {
                entries.push(wgpu::BindGroupEntry {
                    binding: (bindings.inputs.len() + i) as u32,
                    resource: buffer.as_entire_binding(),
                });
            }
        }
        if let Some(buffer) = &uniforms {
            entries.push(wgpu::BindGroupEntry {
                binding: bindings.uniform_binding(),
                resource: buffer.as_entire_binding(),
            });
        }

        let layout = pipeline.pipeline.get_bind_group_layout(0);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(pipeline.label.as_str()),
            layout: &layout,
            entries: &entries,
        });

        pass.pass.set_pipeline(&pipeline.pipeline);
        pass.pass.set_bind_group(0, &bind_group, &[]);
        pass.pass.dispatch_workgroups(groups.x, groups.y, groups.z);

        if let (Some(profiler), Some(slot)) = (&self.profiler, pass.timed) {
            profiler.note_dispatch(slot, &pipeline.label);
        }
    }

    fn push_validation_scope(&self) -> wgpu::ErrorScopeGuard {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation)
    }

    fn pop_validation_scope(&self, scope: wgpu::ErrorScopeGuard) -> ValidationFuture {
        scope.pop().map(|error| error.map(|e| e.to_string())).boxed_local()
    }
}
