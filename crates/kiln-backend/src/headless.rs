//! Host-memory device.
//!
//! [`HeadlessDevice`] implements [`GpuDevice`] without a GPU. Buffers live in
//! host memory and copies execute on submit, but dispatches are only recorded:
//! no shader code runs. It is used to exercise the backend's bookkeeping
//! (ownership, caching, batching, validation plumbing) on machines without a
//! GPU adapter.

use futures::future;
use kiln_core::{
    BufferUsage, DeviceCapabilities, DeviceLimits, DispatchBindings, DispatchGroup, Error,
    GpuDevice, ReadbackFuture, Result, ValidationFuture,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Handle to a host-memory buffer. Equality is identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostBuffer {
    id: u64,
}

/// Pipeline created by [`HeadlessDevice`].
#[derive(Debug, Clone)]
pub struct HeadlessPipeline {
    pub label: String,
    pub entry_point: String,
    pub wgsl: String,
}

/// A dispatch as recorded by [`HeadlessDevice`].
#[derive(Debug, Clone)]
pub struct RecordedDispatch {
    pub label: String,
    pub groups: DispatchGroup,
    pub inputs: Vec<HostBuffer>,
    pub outputs: Vec<Option<HostBuffer>>,
    pub uniforms: Vec<u8>,
}

#[derive(Debug)]
enum Command {
    Copy {
        source: HostBuffer,
        destination: HostBuffer,
        size: u64,
    },
    Dispatch(RecordedDispatch),
}

type CommandList = Arc<Mutex<Vec<Command>>>;

/// Command encoder of [`HeadlessDevice`].
#[derive(Debug, Default)]
pub struct HeadlessEncoder {
    commands: CommandList,
}

/// Compute pass of [`HeadlessDevice`].
#[derive(Debug)]
pub struct HeadlessPass {
    commands: CommandList,
}

/// Validation scope of [`HeadlessDevice`].
#[derive(Debug)]
pub struct HeadlessScope {
    first_error: usize,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_buffer: u64,
    buffers: HashMap<u64, Vec<u8>>,
    destroyed_buffers: usize,
    pipelines_created: usize,
    submissions: usize,
    dispatches: Vec<RecordedDispatch>,
    errors: Vec<String>,
}

/// A [`GpuDevice`] backed by host memory.
#[derive(Debug)]
pub struct HeadlessDevice {
    limits: DeviceLimits,
    capabilities: DeviceCapabilities,
    state: Mutex<HeadlessState>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(DeviceLimits::default())
    }
}

impl HeadlessDevice {
    pub fn new(limits: DeviceLimits) -> Self {
        Self {
            limits,
            capabilities: DeviceCapabilities::default(),
            state: Mutex::new(HeadlessState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of buffers currently alive on the device.
    pub fn live_buffers(&self) -> usize {
        self.state().buffers.len()
    }

    pub fn destroyed_buffers(&self) -> usize {
        self.state().destroyed_buffers
    }

    pub fn pipelines_created(&self) -> usize {
        self.state().pipelines_created
    }

    pub fn submissions(&self) -> usize {
        self.state().submissions
    }

    /// Dispatches executed by submitted encoders, in submission order.
    pub fn dispatches(&self) -> Vec<RecordedDispatch> {
        self.state().dispatches.clone()
    }

    /// Contents of a buffer, or `None` if it was destroyed.
    pub fn buffer_contents(&self, buffer: &HostBuffer) -> Option<Vec<u8>> {
        self.state().buffers.get(&buffer.id).cloned()
    }

    /// Report a validation error as if the device had raised one.
    pub fn inject_validation_error(&self, message: impl Into<String>) {
        self.state().errors.push(message.into());
    }

    fn execute(&self, commands: Vec<Command>) {
        let mut guard = self.state();
        let state = &mut *guard;
        for command in commands {
            match command {
                Command::Copy {
                    source,
                    destination,
                    size,
                } => {
                    let Some(data) = state.buffers.get(&source.id).cloned() else {
                        state.errors.push(format!("Copy from destroyed buffer {}", source.id));
                        continue;
                    };
                    match state.buffers.get_mut(&destination.id) {
                        Some(target) if data.len() as u64 >= size && target.len() as u64 >= size => {
                            let size = size as usize;
                            target[..size].copy_from_slice(&data[..size]);
                        }
                        _ => state.errors.push(format!(
                            "Invalid copy of {size} bytes from buffer {} to buffer {}",
                            source.id, destination.id
                        )),
                    }
                }
                Command::Dispatch(dispatch) => state.dispatches.push(dispatch),
            }
        }
    }
}

impl GpuDevice for HeadlessDevice {
    type Buffer = HostBuffer;
    type Pipeline = HeadlessPipeline;
    type Encoder = HeadlessEncoder;
    type Pass = HeadlessPass;
    type ErrorScope = HeadlessScope;

    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn create_buffer(&self, size: u64, _usage: BufferUsage) -> HostBuffer {
        self.create_buffer_init(&vec![0; size as usize], BufferUsage::Storage)
    }

    fn create_buffer_init(&self, contents: &[u8], _usage: BufferUsage) -> HostBuffer {
        let mut state = self.state();
        let id = state.next_buffer;
        state.next_buffer += 1;
        state.buffers.insert(id, contents.to_vec());
        HostBuffer { id }
    }

    fn destroy_buffer(&self, buffer: &HostBuffer) {
        let mut state = self.state();
        if state.buffers.remove(&buffer.id).is_some() {
            state.destroyed_buffers += 1;
        }
    }

    fn buffer_size(&self, buffer: &HostBuffer) -> u64 {
        self.state()
            .buffers
            .get(&buffer.id)
            .map_or(0, |data| data.len() as u64)
    }

    fn create_command_encoder(&self) -> HeadlessEncoder {
        HeadlessEncoder::default()
    }

    fn begin_compute_pass(&self, encoder: &mut HeadlessEncoder) -> HeadlessPass {
        HeadlessPass {
            commands: Arc::clone(&encoder.commands),
        }
    }

    fn end_compute_pass(&self, pass: HeadlessPass) {
        drop(pass);
    }

    fn copy_buffer(
        &self,
        encoder: &mut HeadlessEncoder,
        source: &HostBuffer,
        destination: &HostBuffer,
        size: u64,
    ) {
        // A copy with an open pass is a usage error on real devices
        if Arc::strong_count(&encoder.commands) > 1 {
            self.state()
                .errors
                .push("Buffer copy recorded while a compute pass is open".to_string());
        }
        lock(&encoder.commands).push(Command::Copy {
            source: source.clone(),
            destination: destination.clone(),
            size,
        });
    }

    fn submit(&self, encoder: HeadlessEncoder) {
        let commands = std::mem::take(&mut *lock(&encoder.commands));
        self.execute(commands);
        self.state().submissions += 1;
    }

    fn read_buffer(&self, buffer: &HostBuffer, size: u64) -> ReadbackFuture {
        let result = match self.state().buffers.get(&buffer.id) {
            Some(data) => Ok(data[..(size as usize).min(data.len())].to_vec()),
            None => Err(Error::Device(format!(
                "Readback from destroyed buffer {}",
                buffer.id
            ))),
        };
        Box::pin(future::ready(result))
    }

    fn create_pipeline(&self, label: &str, wgsl: &str, entry_point: &str) -> Result<HeadlessPipeline> {
        if !wgsl.contains(&format!("fn {entry_point}(")) {
            return Err(Error::ShaderCompilation(format!(
                "Entry point '{entry_point}' not found in '{label}'"
            )));
        }
        self.state().pipelines_created += 1;
        Ok(HeadlessPipeline {
            label: label.to_string(),
            entry_point: entry_point.to_string(),
            wgsl: wgsl.to_string(),
        })
    }

    fn dispatch(
        &self,
        pass: &mut HeadlessPass,
        pipeline: &HeadlessPipeline,
        bindings: &DispatchBindings<'_, HostBuffer>,
        groups: DispatchGroup,
    ) {
        // Binding one buffer as both read-only and read-write is rejected by real devices
        let aliased = bindings
            .outputs
            .iter()
            .flatten()
            .any(|output| bindings.inputs.contains(output));
        if aliased {
            self.state().errors.push(format!(
                "Dispatch '{}' binds a buffer as both input and output",
                pipeline.label
            ));
        }

        lock(&pass.commands).push(Command::Dispatch(RecordedDispatch {
            label: pipeline.label.clone(),
            groups,
            inputs: bindings.inputs.to_vec(),
            outputs: bindings.outputs.to_vec(),
            uniforms: bindings.uniforms.to_vec(),
        }));
    }

    fn push_validation_scope(&self) -> HeadlessScope {
        HeadlessScope {
            first_error: self.state().errors.len(),
        }
    }

    fn pop_validation_scope(&self, scope: HeadlessScope) -> ValidationFuture {
        let mut state = self.state();
        let first = scope.first_error.min(state.errors.len());
        let captured = state.errors.drain(first..).next();
        Box::pin(future::ready(captured))
    }
}

fn lock(commands: &CommandList) -> MutexGuard<'_, Vec<Command>> {
    commands
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
