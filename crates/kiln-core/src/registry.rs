//! Operator resolution table.

use crate::Result;
use crate::attribute::Attributes;
use crate::kernel::{ComputeContext, ProcessedAttribute};
use std::collections::HashMap;

/// Runs one kernel invocation.
pub type RunFn = fn(&mut ComputeContext<'_>, &ProcessedAttribute) -> Result<()>;

/// Turns raw attributes into the operator's typed attribute, once per kernel.
pub type PreprocessFn = fn(&Attributes) -> Result<ProcessedAttribute>;

/// How to execute one operator type.
#[derive(Clone, Copy)]
pub struct OpResolveRule {
    pub run: RunFn,
    pub preprocess: Option<PreprocessFn>,
}

impl OpResolveRule {
    /// Rule whose run function receives the raw attributes.
    pub fn new(run: RunFn) -> Self {
        Self {
            run,
            preprocess: None,
        }
    }

    pub fn with_preprocess(run: RunFn, preprocess: PreprocessFn) -> Self {
        Self {
            run,
            preprocess: Some(preprocess),
        }
    }
}

/// Registry for operator implementations.
///
/// Maps operator type names (e.g., "Add", "Softmax") to their resolve rules.
/// The backend consults it when a kernel is created.
///
/// # Example
///
/// ```ignore
/// let mut registry = OpResolveRegistry::new();
/// registry.register("Add", OpResolveRule::new(run_add));
/// registry.register("Softmax", OpResolveRule::with_preprocess(run_softmax, parse_softmax));
///
/// let rule = registry.get("Add").unwrap();
/// ```
#[derive(Clone, Default)]
pub struct OpResolveRegistry {
    rules: HashMap<String, OpResolveRule>,
}

impl OpResolveRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule, replacing any previous rule for `op_type`.
    ///
    /// Returns `self` for method chaining.
    pub fn register(&mut self, op_type: &str, rule: OpResolveRule) -> &mut Self {
        self.rules.insert(op_type.to_string(), rule);
        self
    }

    /// Look up the rule for an operator type.
    pub fn get(&self, op_type: &str) -> Option<&OpResolveRule> {
        self.rules.get(op_type)
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.rules.contains_key(op_type)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterate over all registered operator types.
    pub fn op_types(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(|s| s.as_str())
    }
}
