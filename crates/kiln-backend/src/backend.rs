//! The execution orchestrator.

use crate::batch::CommandBatch;
use crate::buffer_manager::GpuDataManager;
use crate::config::BackendConfig;
use crate::error_sink::{ErrorSink, FailureKind, KernelFailure};
use crate::program_manager::{ProgramArtifact, ProgramManager};
use kiln_core::{
    Attributes, BufferId, ComputeContext, Error, GpuDevice, KernelAttribute, KernelCustomData,
    KernelId, KernelIo, OpResolveRegistry, OpResolveRule, OutputOwnership, ProgramInfo,
    ProgramRunner, ProgramSignature, ProgramSource, Result, SessionId, TensorView,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Outcome of one [`Backend::compute_kernel`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelStatus {
    Ok,
    /// The run function failed; details are in the error sink.
    Failed,
}

impl KernelStatus {
    /// Numeric status code: 0 for success, 1 for failure.
    pub fn code(self) -> u32 {
        match self {
            KernelStatus::Ok => 0,
            KernelStatus::Failed => 1,
        }
    }
}

/// Accumulated host-side time of one operator type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelTiming {
    pub calls: u64,
    pub total: Duration,
}

struct KernelRecord {
    op_type: String,
    node_name: String,
    rule: OpResolveRule,
    attribute: KernelAttribute,
}

/// Schedules kernels onto a [`GpuDevice`].
///
/// The backend owns every piece of mutable execution state: the kernel
/// table, buffer ownership lists, the program cache and the open command
/// batch. At most one kernel runs at a time; a kernel's run function reaches
/// back into the backend only through [`ProgramRunner`].
///
/// # Example
///
/// ```ignore
/// let mut backend = Backend::new(device, registry, BackendConfig::default());
/// backend.create_kernel("Add", KernelId(1), Attributes::new(), "add_0")?;
///
/// let mut io = SimpleKernelIo::new(vec![a, b], 1);
/// let mut errors = ErrorSink::new();
/// backend.compute_kernel(KernelId(1), &mut io, &mut errors)?;
///
/// let bytes = backend.download(io.output(0).unwrap().buffer).await?;
/// ```
pub struct Backend<D: GpuDevice> {
    device: Arc<D>,
    config: BackendConfig,
    registry: Arc<OpResolveRegistry>,
    buffers: GpuDataManager<D>,
    programs: ProgramManager<D>,
    batch: CommandBatch<D>,
    kernels: HashMap<KernelId, KernelRecord>,
    persistent_buffers: HashMap<KernelId, Vec<BufferId>>,
    custom_data: HashMap<KernelId, KernelCustomData>,
    temporary_buffers: Vec<BufferId>,
    current_kernel: Option<KernelId>,
    sessions: HashMap<SessionId, HashMap<usize, (BufferId, D::Buffer)>>,
    timings: HashMap<String, KernelTiming>,
}

impl<D: GpuDevice> Backend<D> {
    pub fn new(device: Arc<D>, registry: Arc<OpResolveRegistry>, config: BackendConfig) -> Self {
        debug!(
            operators = registry.len(),
            validation = config.validation,
            "Creating backend"
        );
        Self {
            buffers: GpuDataManager::new(Arc::clone(&device)),
            programs: ProgramManager::new(Arc::clone(&device), config.program_cache_capacity),
            batch: CommandBatch::new(),
            device,
            config,
            registry,
            kernels: HashMap::new(),
            persistent_buffers: HashMap::new(),
            custom_data: HashMap::new(),
            temporary_buffers: Vec::new(),
            current_kernel: None,
            sessions: HashMap::new(),
            timings: HashMap::new(),
        }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn buffers(&self) -> &GpuDataManager<D> {
        &self.buffers
    }

    pub fn programs(&self) -> &ProgramManager<D> {
        &self.programs
    }

    // ---- Kernel lifecycle ----

    /// Bind `op_type` to a new kernel.
    ///
    /// Fails with [`Error::UnimplementedOperator`] if the registry has no rule
    /// for `op_type`. No device work happens here.
    pub fn create_kernel(
        &mut self,
        op_type: &str,
        kernel_id: KernelId,
        attributes: Attributes,
        node_name: &str,
    ) -> Result<()> {
        if self.kernels.contains_key(&kernel_id) {
            return Err(Error::KernelAlreadyExists(kernel_id));
        }
        let rule = *self
            .registry
            .get(op_type)
            .ok_or_else(|| Error::UnimplementedOperator(op_type.to_string()))?;

        self.kernels.insert(
            kernel_id,
            KernelRecord {
                op_type: op_type.to_string(),
                node_name: node_name.to_string(),
                rule,
                attribute: KernelAttribute::Unprocessed(attributes),
            },
        );
        debug!(%kernel_id, op_type, node = node_name, "Created kernel");
        Ok(())
    }

    /// Release a kernel and everything it owns. Unknown ids are ignored.
    pub fn release_kernel(&mut self, kernel_id: KernelId) {
        for buffer in self
            .persistent_buffers
            .remove(&kernel_id)
            .unwrap_or_default()
        {
            self.buffers.release(buffer);
        }
        self.custom_data.remove(&kernel_id);
        if let Some(record) = self.kernels.remove(&kernel_id) {
            debug!(%kernel_id, op_type = %record.op_type, "Released kernel");
        }
    }

    /// Run a kernel.
    ///
    /// Contract violations (unknown kernel, a kernel already running) are
    /// returned as errors. A failure inside the kernel is recorded in
    /// `errors` and reported as [`KernelStatus::Failed`]. With validation
    /// enabled, a deferred check for the kernel's device commands is queued in
    /// `errors` as well; it does not change the returned status.
    ///
    /// Temporary buffers are released and the kernel cursor is cleared on
    /// every path.
    pub fn compute_kernel(
        &mut self,
        kernel_id: KernelId,
        io: &mut dyn KernelIo,
        errors: &mut ErrorSink,
    ) -> Result<KernelStatus> {
        let record = self
            .kernels
            .get(&kernel_id)
            .ok_or(Error::KernelNotFound(kernel_id))?;
        if let Some(active) = self.current_kernel {
            return Err(Error::ReentrantKernelCall {
                active,
                requested: kernel_id,
            });
        }
        let op_type = record.op_type.clone();
        let node_name = record.node_name.clone();
        let _span = tracing::debug_span!("kernel", id = %kernel_id, op_type = %op_type).entered();

        self.current_kernel = Some(kernel_id);
        self.temporary_buffers.clear();
        let scope = self
            .config
            .validation
            .then(|| self.device.push_validation_scope());
        let started = self.config.profiling.then(Instant::now);

        let result = self.invoke_kernel(kernel_id, io);

        if let Some(scope) = scope {
            errors.defer(&op_type, &node_name, self.device.pop_validation_scope(scope));
        }
        for buffer in self.temporary_buffers.drain(..) {
            self.buffers.release(buffer);
        }
        self.current_kernel = None;

        if let Some(started) = started {
            let timing = self.timings.entry(op_type.clone()).or_default();
            timing.calls += 1;
            timing.total += started.elapsed();
        }

        match result {
            Ok(()) => Ok(KernelStatus::Ok),
            Err(e) => {
                warn!(node = %node_name, "Kernel failed: {e}");
                errors.push(KernelFailure {
                    op_type,
                    node_name,
                    kind: FailureKind::Execution,
                    detail: e.to_string(),
                });
                Ok(KernelStatus::Failed)
            }
        }
    }

    fn invoke_kernel(&mut self, kernel_id: KernelId, io: &mut dyn KernelIo) -> Result<()> {
        let record = self
            .kernels
            .get_mut(&kernel_id)
            .ok_or(Error::KernelNotFound(kernel_id))?;
        let run = record.rule.run;
        let attribute = record.attribute.process(record.rule.preprocess)?;

        let mut ctx = ComputeContext::new(self, io);
        run(&mut ctx, &attribute)
    }

    /// The kernel currently running, if any.
    pub fn current_kernel(&self) -> Option<KernelId> {
        self.current_kernel
    }

    pub fn kernel_count(&self) -> usize {
        self.kernels.len()
    }

    pub fn has_kernel(&self, kernel_id: KernelId) -> bool {
        self.kernels.contains_key(&kernel_id)
    }

    /// Persistent buffers owned by a kernel.
    pub fn persistent_buffers(&self, kernel_id: KernelId) -> &[BufferId] {
        self.persistent_buffers
            .get(&kernel_id)
            .map_or(&[], Vec::as_slice)
    }

    /// Host-side time per operator type. Empty unless profiling is enabled.
    pub fn kernel_timings(&self) -> &HashMap<String, KernelTiming> {
        &self.timings
    }

    // ---- Batch control ----

    /// Submit recorded commands. A no-op when nothing is recorded.
    pub fn flush(&mut self) {
        let pending = self.batch.pending_dispatches();
        if let Some(encoder) = self.batch.finish(&self.device) {
            self.device.submit(encoder);
            self.buffers.refresh_pending_buffers();
            debug!(dispatches = pending, "Flushed command batch");
        }
    }

    /// Dispatches recorded since the last flush.
    pub fn pending_dispatches(&self) -> usize {
        self.batch.pending_dispatches()
    }

    // ---- Buffers ----

    pub fn alloc(&mut self, size: u64) -> Result<BufferId> {
        self.buffers.create(size)
    }

    /// Release a buffer; returns its size, or 0 if the id is unknown or
    /// names a session-registered external buffer.
    pub fn free(&mut self, id: BufferId) -> u64 {
        self.buffers.release(id)
    }

    /// Record an upload. It becomes visible to dispatches recorded after it.
    pub fn upload(&mut self, id: BufferId, data: &[u8]) -> Result<()> {
        let encoder = self.batch.encoder(&self.device);
        self.buffers.upload(id, data, encoder)
    }

    /// Record a copy between two buffers of equal size.
    pub fn memcpy(&mut self, source: BufferId, destination: BufferId) -> Result<()> {
        let encoder = self.batch.encoder(&self.device);
        self.buffers.memcpy(source, destination, encoder)
    }

    /// Flush and read a buffer back.
    pub async fn download(&mut self, id: BufferId) -> Result<Vec<u8>> {
        let encoder = self.batch.encoder(&self.device);
        let (staging, size) = self.buffers.stage_download(id, encoder)?;
        self.flush();

        let data = self.device.read_buffer(&staging, size).await;
        self.device.destroy_buffer(&staging);
        data
    }

    /// Flush and read a buffer back into `target`, which must hold at least
    /// the buffer's size. Returns the number of bytes written.
    pub async fn download_into(&mut self, id: BufferId, target: &mut [u8]) -> Result<usize> {
        let data = self.download(id).await?;
        let capacity = target.len() as u64;
        let destination = target
            .get_mut(..data.len())
            .ok_or(Error::BufferSizeMismatch {
                source_size: data.len() as u64,
                destination_size: capacity,
            })?;
        destination.copy_from_slice(&data);
        Ok(data.len())
    }

    pub fn get_buffer(&self, id: BufferId) -> Result<&D::Buffer> {
        self.buffers.get(id)
    }

    // ---- Session buffers ----

    /// Register a caller-owned buffer as slot `index` of `session`.
    ///
    /// Registering the same buffer into the same slot again returns the same
    /// id. Registering a different buffer replaces the slot's previous one.
    pub fn register_buffer(
        &mut self,
        session: SessionId,
        index: usize,
        raw: D::Buffer,
        size: u64,
    ) -> BufferId {
        let slots = self.sessions.entry(session).or_default();
        let previous = slots.get(&index).map(|(_, buffer)| buffer);
        let id = self.buffers.register_external(raw.clone(), size, previous);
        slots.insert(index, (id, raw));
        trace!(?session, index, %id, "Registered session buffer");
        id
    }

    /// Drop every buffer registered by `session`. Unknown sessions are ignored.
    pub fn unregister_buffers(&mut self, session: SessionId) {
        let Some(slots) = self.sessions.remove(&session) else {
            return;
        };
        for (_, (_, raw)) in slots {
            self.buffers.unregister_external(&raw);
        }
        debug!(?session, "Unregistered session buffers");
    }

    /// Flush outstanding work and tear everything down.
    pub fn shutdown(mut self) {
        self.flush();

        let kernels: Vec<KernelId> = self.kernels.keys().copied().collect();
        for kernel_id in kernels {
            self.release_kernel(kernel_id);
        }
        let sessions: Vec<SessionId> = self.sessions.keys().copied().collect();
        for session in sessions {
            self.unregister_buffers(session);
        }

        self.programs.clear();
        self.buffers.destroy_all();
        debug!("Backend shut down");
    }

    // ---- Program dispatch ----

    fn allocate_owned_output(
        &mut self,
        ownership: OutputOwnership,
        size: u64,
    ) -> Result<BufferId> {
        let kernel_id = self.current_kernel.ok_or(Error::NoActiveKernel)?;
        let id = self.buffers.create(size)?;
        match ownership {
            OutputOwnership::Persistent => self
                .persistent_buffers
                .entry(kernel_id)
                .or_default()
                .push(id),
            _ => self.temporary_buffers.push(id),
        }
        Ok(id)
    }

    fn artifact_for(
        &mut self,
        signature: ProgramSignature,
        cached: Option<Arc<ProgramArtifact<D::Pipeline>>>,
        info: &Arc<ProgramInfo>,
    ) -> Result<Arc<ProgramArtifact<D::Pipeline>>> {
        if let Some(artifact) = cached {
            return Ok(artifact);
        }
        debug!(%signature, "Program cache miss");
        let artifact = Arc::new(self.programs.build(Arc::clone(info))?);
        self.programs.set(signature, Arc::clone(&artifact));
        Ok(artifact)
    }
}

impl<D: GpuDevice> ProgramRunner for Backend<D> {
    fn run(
        &mut self,
        program: ProgramSource,
        inputs: &[TensorView],
        outputs: &[OutputOwnership],
        io: &mut dyn KernelIo,
    ) -> Result<Vec<TensorView>> {
        let metadata = program.metadata();
        if inputs.len() != metadata.input_count {
            return Err(Error::ArityMismatch {
                program: metadata.name.clone(),
                expected: metadata.input_count,
                actual: inputs.len(),
            });
        }

        let input_buffers = inputs
            .iter()
            .map(|view| self.buffers.get(view.buffer).cloned())
            .collect::<Result<Vec<_>>>()?;

        let signature = ProgramSignature::new(metadata, inputs);
        let cached = self.programs.get(&signature);
        let info = match &cached {
            Some(artifact) => {
                trace!(%signature, "Program cache hit");
                Arc::clone(&artifact.program_info)
            }
            None => Arc::new(program.load()?),
        };

        let directives: Vec<OutputOwnership> = if outputs.is_empty() {
            (0..info.outputs.len()).map(OutputOwnership::Kernel).collect()
        } else {
            outputs.to_vec()
        };
        if directives.len() != info.outputs.len() {
            return Err(Error::OutputArityMismatch {
                program: info.name().to_string(),
                expected: info.outputs.len(),
                actual: directives.len(),
            });
        }
        let output_count = io.output_count();
        for directive in &directives {
            if let OutputOwnership::Kernel(index) = *directive {
                if index >= output_count {
                    return Err(Error::InvalidOutputIndex {
                        index,
                        output_count,
                    });
                }
            }
        }

        let mut views = Vec::with_capacity(directives.len());
        let mut output_buffers = Vec::with_capacity(directives.len());
        for (output, directive) in info.outputs.iter().zip(&directives) {
            let view = match *directive {
                OutputOwnership::Placeholder => {
                    output_buffers.push(None);
                    continue;
                }
                OutputOwnership::Kernel(index) => {
                    io.create_output(index, output.dtype, &output.dims, &mut self.buffers)?
                }
                ownership => {
                    let size = (output.dims.iter().product::<usize>() * output.dtype.size()) as u64;
                    let id = self.allocate_owned_output(ownership, size)?;
                    TensorView::new(id, output.dtype, &output.dims)
                }
            };
            output_buffers.push(Some(self.buffers.get(view.buffer)?.clone()));
            views.push(view);
        }

        let groups = self
            .programs
            .normalize_dispatch_group_size((info.dispatch_group)(inputs)?)?;
        let artifact = self.artifact_for(signature, cached, &info)?;

        if groups.total() == 0 {
            trace!(program = info.name(), "Skipping empty dispatch");
            return Ok(views);
        }

        let pass = self.batch.compute_pass(&self.device);
        self.programs
            .run(pass, &artifact, &input_buffers, &output_buffers, groups);

        if self.batch.record_dispatch() >= self.config.max_pending_dispatches {
            debug!(
                limit = self.config.max_pending_dispatches,
                "Pending dispatch limit reached"
            );
            self.flush();
        }

        Ok(views)
    }

    fn current_kernel_custom_data(&mut self) -> Result<&mut KernelCustomData> {
        let kernel_id = self.current_kernel.ok_or(Error::NoActiveKernel)?;
        Ok(self.custom_data.entry(kernel_id).or_default())
    }
}
