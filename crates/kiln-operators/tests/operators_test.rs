//! Operator tests on a headless device.
//!
//! These check the programs each operator builds and dispatches: output
//! shapes, uniform blocks, dispatch counts and cache behavior. Numeric
//! results are covered by the GPU tests in kiln-runtime.

mod common;

use common::{f32_tensor, make_backend, run_kernel, tensor, uniform_words};
use kiln_backend::{FailureKind, KernelStatus};
use kiln_core::{AttributeValue, Attributes, DataType};

#[test]
fn test_every_core_op_computes() {
    let (device, mut backend) = make_backend();

    for (id, op_type) in ["Add", "Sub", "Mul", "Div"].into_iter().enumerate() {
        let a = f32_tensor(&mut backend, &[2, 3]);
        let b = f32_tensor(&mut backend, &[2, 3]);
        let run = run_kernel(&mut backend, id as u64, op_type, Attributes::new(), vec![a, b]);
        assert_eq!(run.status, KernelStatus::Ok, "{op_type}: {:?}", run.errors);
        assert_eq!(run.output.unwrap().dims, vec![2, 3]);
    }

    for (id, op_type) in ["Neg", "Sqrt", "Relu", "Tanh", "Sigmoid", "Softmax"]
        .into_iter()
        .enumerate()
    {
        let x = f32_tensor(&mut backend, &[4, 5]);
        let run = run_kernel(&mut backend, 10 + id as u64, op_type, Attributes::new(), vec![x]);
        assert_eq!(run.status, KernelStatus::Ok, "{op_type}: {:?}", run.errors);
        assert_eq!(run.output.unwrap().dims, vec![4, 5]);
    }

    backend.flush();
    // Softmax dispatches twice
    assert_eq!(device.dispatches().len(), 11);
}

#[test]
fn test_unary_ops_share_source_but_not_programs() {
    let (device, mut backend) = make_backend();

    for (id, op_type) in ["Neg", "Relu", "Neg"].into_iter().enumerate() {
        let x = f32_tensor(&mut backend, &[8]);
        let run = run_kernel(&mut backend, id as u64, op_type, Attributes::new(), vec![x]);
        assert_eq!(run.status, KernelStatus::Ok);
    }

    // Neg runs twice on the same signature
    assert_eq!(backend.programs().build_count(), 2);
    backend.flush();
    let dispatches = device.dispatches();
    assert_eq!(dispatches[0].label, "Neg");
    assert_eq!(dispatches[1].label, "Relu");
    assert_eq!(uniform_words(&dispatches[0].uniforms), vec![8]);
}

#[test]
fn test_broadcast_add_uniforms() {
    let (device, mut backend) = make_backend();
    let a = f32_tensor(&mut backend, &[2, 3]);
    let b = f32_tensor(&mut backend, &[3]);

    let run = run_kernel(&mut backend, 1, "Add", Attributes::new(), vec![a, b]);
    assert_eq!(run.status, KernelStatus::Ok);
    assert_eq!(run.output.unwrap().dims, vec![2, 3]);

    backend.flush();
    let words = uniform_words(&device.dispatches()[0].uniforms);
    assert_eq!(&words[..4], &[6, 2, 0, 0]);
    // Dims, then strides of a and b, each padded to 8 entries
    assert_eq!(&words[4..6], &[2, 3]);
    assert_eq!(&words[12..14], &[3, 1]);
    assert_eq!(&words[20..22], &[0, 1]);
}

#[test]
fn test_broadcast_mismatch_fails_kernel() {
    let (device, mut backend) = make_backend();
    let a = f32_tensor(&mut backend, &[2, 3]);
    let b = f32_tensor(&mut backend, &[4]);

    let run = run_kernel(&mut backend, 1, "Mul", Attributes::new(), vec![a, b]);
    assert_eq!(run.status, KernelStatus::Failed);
    let failure = &run.errors.failures()[0];
    assert_eq!(failure.kind, FailureKind::Execution);
    assert!(failure.detail.contains("Cannot broadcast"), "{}", failure.detail);

    backend.flush();
    assert!(device.dispatches().is_empty());
}

#[test]
fn test_non_float_input_fails_kernel() {
    let (_, mut backend) = make_backend();
    let x = tensor(&mut backend, DataType::I64, &[4]);

    let run = run_kernel(&mut backend, 1, "Relu", Attributes::new(), vec![x]);
    assert_eq!(run.status, KernelStatus::Failed);
    assert!(run.errors.failures()[0].detail.contains("int64"));
    assert_eq!(backend.programs().build_count(), 0);
}

#[test]
fn test_softmax_releases_statistics() {
    let (device, mut backend) = make_backend();
    let x = f32_tensor(&mut backend, &[3, 4]);
    let buffers_before = backend.buffers().buffer_count();

    let run = run_kernel(&mut backend, 1, "Softmax", Attributes::new(), vec![x.clone()]);
    assert_eq!(run.status, KernelStatus::Ok);

    // Only the output survives the call
    assert_eq!(backend.buffers().buffer_count(), buffers_before + 1);

    backend.flush();
    let dispatches = device.dispatches();
    assert_eq!(dispatches.len(), 2);
    assert_eq!(dispatches[0].label, "SoftmaxStats");
    assert_eq!(dispatches[1].label, "SoftmaxNormalize");
    // The statistics written by the first dispatch feed the second
    assert_eq!(dispatches[1].inputs[1], dispatches[0].outputs[0].clone().unwrap());
    assert_eq!(uniform_words(&dispatches[0].uniforms), vec![3, 4, 1, 0]);
}

#[test]
fn test_softmax_axis_selects_program() {
    let (device, mut backend) = make_backend();

    let last = f32_tensor(&mut backend, &[2, 5]);
    run_kernel(&mut backend, 1, "Softmax", Attributes::new(), vec![last]);

    let first = f32_tensor(&mut backend, &[2, 5]);
    let axis_zero = Attributes::new().with("axis", AttributeValue::Int(0));
    run_kernel(&mut backend, 2, "Softmax", axis_zero, vec![first]);

    // Same input signature, different axis: two programs per kernel
    assert_eq!(backend.programs().build_count(), 4);

    backend.flush();
    let dispatches = device.dispatches();
    assert_eq!(uniform_words(&dispatches[0].uniforms), vec![2, 5, 1, 0]);
    assert_eq!(uniform_words(&dispatches[2].uniforms), vec![1, 2, 5, 0]);
}

#[test]
fn test_softmax_invalid_axis_fails_kernel() {
    let (_, mut backend) = make_backend();
    let x = f32_tensor(&mut backend, &[2, 5]);
    let attributes = Attributes::new().with("axis", AttributeValue::Int(2));

    let run = run_kernel(&mut backend, 1, "Softmax", attributes, vec![x]);
    assert_eq!(run.status, KernelStatus::Failed);
    assert!(run.errors.failures()[0].detail.contains("out of bounds"));
}

#[test]
fn test_softmax_bad_attribute_fails_kernel() {
    let (_, mut backend) = make_backend();
    let x = f32_tensor(&mut backend, &[4]);
    let attributes = Attributes::new().with("axis", AttributeValue::String("last".to_string()));

    let run = run_kernel(&mut backend, 1, "Softmax", attributes, vec![x]);
    assert_eq!(run.status, KernelStatus::Failed);
}

#[test]
fn test_unknown_op_is_rejected_at_creation() {
    let (_, mut backend) = make_backend();
    let result = backend.create_kernel(
        "MatMul",
        kiln_core::KernelId(1),
        Attributes::new(),
        "matmul",
    );
    assert!(matches!(
        result,
        Err(kiln_core::Error::UnimplementedOperator(op)) if op == "MatMul"
    ));
}
