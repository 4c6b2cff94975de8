//! Core operator registry.

use kiln_core::{OpResolveRegistry, OpResolveRule};

use crate::families::binary_elementwise::{run_add, run_div, run_mul, run_sub};
use crate::families::unary_elementwise::{run_neg, run_relu, run_sigmoid, run_sqrt, run_tanh};
use crate::operators::{parse_softmax, run_softmax};

/// Returns a registry pre-populated with the core operators.
///
/// The registry includes:
/// - 4 binary elementwise operators (Add, Sub, Mul, Div)
/// - 5 unary elementwise operators (Neg, Sqrt, Relu, Tanh, Sigmoid)
/// - Softmax
///
/// Custom operators can be added to the returned registry via
/// `registry.register(name, rule)`.
pub fn core_op_registry() -> OpResolveRegistry {
    let mut registry = OpResolveRegistry::new();

    registry
        .register("Add", OpResolveRule::new(run_add))
        .register("Sub", OpResolveRule::new(run_sub))
        .register("Mul", OpResolveRule::new(run_mul))
        .register("Div", OpResolveRule::new(run_div));

    registry
        .register("Neg", OpResolveRule::new(run_neg))
        .register("Sqrt", OpResolveRule::new(run_sqrt))
        .register("Relu", OpResolveRule::new(run_relu))
        .register("Tanh", OpResolveRule::new(run_tanh))
        .register("Sigmoid", OpResolveRule::new(run_sigmoid));

    registry.register(
        "Softmax",
        OpResolveRule::with_preprocess(run_softmax, parse_softmax),
    );

    registry
}
