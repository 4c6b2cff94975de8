//! Common test utilities for operator tests.
//!
//! Operators run on a `HeadlessDevice`: shaders are preprocessed and
//! validated, dispatches are recorded but not executed.

#![allow(dead_code)]

use kiln_backend::{Backend, BackendConfig, ErrorSink, HeadlessDevice, KernelStatus, SimpleKernelIo};
use kiln_core::{Attributes, DataType, KernelId, TensorView};
use std::sync::Arc;

/// Route backend logs to the test harness. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A backend over the core operator set on a fresh headless device.
pub fn make_backend() -> (Arc<HeadlessDevice>, Backend<HeadlessDevice>) {
    init_tracing();
    let device = Arc::new(HeadlessDevice::default());
    let backend = Backend::new(
        Arc::clone(&device),
        Arc::new(kiln_operators::core_op_registry()),
        BackendConfig::default(),
    );
    (device, backend)
}

/// An uninitialized tensor of the given shape and type.
pub fn tensor(backend: &mut Backend<HeadlessDevice>, dtype: DataType, dims: &[usize]) -> TensorView {
    let size = dims.iter().product::<usize>() * dtype.size();
    let id = backend
        .alloc(size as u64)
        .expect("Allocation should succeed");
    TensorView::new(id, dtype, dims)
}

pub fn f32_tensor(backend: &mut Backend<HeadlessDevice>, dims: &[usize]) -> TensorView {
    tensor(backend, DataType::F32, dims)
}

/// Outcome of a single kernel call.
pub struct KernelRun {
    pub status: KernelStatus,
    pub errors: ErrorSink,
    pub output: Option<TensorView>,
}

/// Create kernel `id` for `op_type` and compute it once on `inputs`.
pub fn run_kernel(
    backend: &mut Backend<HeadlessDevice>,
    id: u64,
    op_type: &str,
    attributes: Attributes,
    inputs: Vec<TensorView>,
) -> KernelRun {
    let kernel_id = KernelId(id);
    if !backend.has_kernel(kernel_id) {
        backend
            .create_kernel(op_type, kernel_id, attributes, &format!("{}_{id}", op_type.to_lowercase()))
            .expect("Kernel creation should succeed");
    }

    let mut io = SimpleKernelIo::new(inputs, 1);
    let mut errors = ErrorSink::new();
    let status = backend
        .compute_kernel(kernel_id, &mut io, &mut errors)
        .expect("Compute should not violate the contract");
    KernelRun {
        status,
        errors,
        output: io.output(0).cloned(),
    }
}

/// Decode a uniform block as little-endian u32 words.
pub fn uniform_words(bytes: &[u8]) -> Vec<u32> {
    bytemuck::pod_collect_to_vec(bytes)
}
