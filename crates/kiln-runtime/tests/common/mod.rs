//! Common test utilities for end-to-end GPU tests.
//!
//! Every helper here needs a real adapter; tests using them are `#[ignore]`d.

#![allow(dead_code)]

use kiln_backend::{Backend, BackendConfig, ErrorSink, KernelStatus, SimpleKernelIo};
use kiln_core::{Attributes, DataType, KernelId, TensorView};
use kiln_runtime::{Runtime, RuntimeConfig, WgpuDevice};
use std::sync::Arc;

/// Route runtime logs to the test harness. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub async fn make_runtime(config: RuntimeConfig) -> Runtime {
    init_tracing();
    let runtime = Runtime::new(config)
        .await
        .expect("Runtime initialization should succeed");
    println!(
        "GPU: {} ({:?})",
        runtime.adapter_info().name,
        runtime.adapter_info().backend
    );
    runtime
}

/// A backend over the core operator set.
pub fn make_backend(runtime: &Runtime, config: BackendConfig) -> Backend<WgpuDevice> {
    runtime.backend(Arc::new(kiln_operators::core_op_registry()), config)
}

pub fn upload_f32(backend: &mut Backend<WgpuDevice>, values: &[f32], dims: &[usize]) -> TensorView {
    let bytes: Vec<u8> = bytemuck::cast_slice(values).to_vec();
    let id = backend
        .alloc(bytes.len() as u64)
        .expect("Allocation should succeed");
    backend.upload(id, &bytes).expect("Upload should succeed");
    TensorView::new(id, DataType::F32, dims)
}

pub async fn download_f32(backend: &mut Backend<WgpuDevice>, view: &TensorView) -> Vec<f32> {
    let bytes = backend
        .download(view.buffer)
        .await
        .expect("Download should succeed");
    bytemuck::pod_collect_to_vec(&bytes[..])
}

/// Create a kernel, run it once on `inputs` and return its single output.
pub async fn run_single(
    backend: &mut Backend<WgpuDevice>,
    op_type: &str,
    attributes: Attributes,
    inputs: Vec<TensorView>,
) -> (TensorView, Vec<f32>) {
    let id = KernelId(backend.kernel_count() as u64 + 1);
    backend
        .create_kernel(op_type, id, attributes, &op_type.to_lowercase())
        .expect("Kernel creation should succeed");

    let mut io = SimpleKernelIo::new(inputs, 1);
    let mut errors = ErrorSink::new();
    let status = backend
        .compute_kernel(id, &mut io, &mut errors)
        .expect("Compute should not violate the contract");
    assert_eq!(status, KernelStatus::Ok, "{op_type} failed: {:?}", errors.failures());

    let output = io.output(0).expect("Kernel should produce an output").clone();
    let values = download_f32(backend, &output).await;

    assert_eq!(errors.resolve_pending().await, 0, "{op_type} raised validation errors");
    (output, values)
}

pub fn assert_close(actual: &[f32], expected: &[f32], tolerance: f32) {
    assert_eq!(actual.len(), expected.len(), "Length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "Mismatch at {i}: got {a}, expected {e}"
        );
    }
}
