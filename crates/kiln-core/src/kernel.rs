//! Kernel-side types: identifiers, attributes, and the context a kernel's
//! run function executes in.

use crate::attribute::Attributes;
use crate::program::{OutputOwnership, ProgramSource};
use crate::registry::PreprocessFn;
use crate::tensor::{BufferId, TensorView};
use crate::types::DataType;
use crate::{Error, Result};
use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Caller-supplied kernel identifier, unique while the kernel is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelId(pub u64);

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Typed attribute produced by an operator's preprocessor.
///
/// Operators without a preprocessor receive the raw [`Attributes`].
#[derive(Clone)]
pub struct ProcessedAttribute(Arc<dyn Any + Send + Sync>);

impl ProcessedAttribute {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the attribute as `T`.
    pub fn get<T: Any>(&self) -> Result<&T> {
        self.0.downcast_ref::<T>().ok_or_else(|| {
            Error::Attribute(format!(
                "Processed attribute is not a {}",
                type_name::<T>()
            ))
        })
    }
}

impl fmt::Debug for ProcessedAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProcessedAttribute(..)")
    }
}

/// Attribute state of a kernel.
///
/// Starts `Unprocessed` and moves to `Processed` on the kernel's first
/// compute call; it never moves back.
#[derive(Debug, Clone)]
pub enum KernelAttribute {
    Unprocessed(Attributes),
    Processed(ProcessedAttribute),
}

impl KernelAttribute {
    pub fn is_processed(&self) -> bool {
        matches!(self, KernelAttribute::Processed(_))
    }

    /// Return the processed attribute, running `preprocess` if this is the
    /// first call.
    ///
    /// If the preprocessor fails, the attribute stays unprocessed.
    pub fn process(&mut self, preprocess: Option<PreprocessFn>) -> Result<ProcessedAttribute> {
        match self {
            KernelAttribute::Processed(processed) => Ok(processed.clone()),
            KernelAttribute::Unprocessed(raw) => {
                let processed = match preprocess {
                    Some(preprocess) => preprocess(raw)?,
                    None => ProcessedAttribute::new(raw.clone()),
                };
                *self = KernelAttribute::Processed(processed.clone());
                Ok(processed)
            }
        }
    }
}

/// Per-kernel key/value store that lives as long as the kernel.
#[derive(Default)]
pub struct KernelCustomData {
    values: HashMap<String, Box<dyn Any + Send>>,
}

impl KernelCustomData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref::<T>()
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key)?.downcast_mut::<T>()
    }

    /// Insert a value, replacing whatever was stored under `key`.
    pub fn insert<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Get the value under `key`, inserting `init()` if absent.
    ///
    /// Fails if a value of a different type is already stored.
    pub fn get_or_insert_with<T: Any + Send>(
        &mut self,
        key: &str,
        init: impl FnOnce() -> T,
    ) -> Result<&mut T> {
        self.values
            .entry(key.to_string())
            .or_insert_with(|| Box::new(init()))
            .downcast_mut::<T>()
            .ok_or_else(|| {
                Error::Execution(format!(
                    "Custom data '{key}' is not a {}",
                    type_name::<T>()
                ))
            })
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for KernelCustomData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Allocates device buffers on behalf of an output factory.
pub trait BufferAllocator {
    fn allocate(&mut self, size: u64) -> Result<BufferId>;
}

/// The caller's side of a kernel invocation: where inputs come from and
/// where kernel outputs go.
pub trait KernelIo {
    fn inputs(&self) -> &[TensorView];

    fn output_count(&self) -> usize;

    /// Create kernel output `index`.
    ///
    /// The caller owns the returned buffer; it may allocate one through
    /// `allocator` or hand back a buffer it registered beforehand.
    fn create_output(
        &mut self,
        index: usize,
        dtype: DataType,
        dims: &[usize],
        allocator: &mut dyn BufferAllocator,
    ) -> Result<TensorView>;
}

/// What a running kernel can ask of the backend.
pub trait ProgramRunner {
    /// Dispatch one program and return its output views.
    ///
    /// An empty `outputs` slice maps every declared output to the kernel
    /// output with the same index.
    fn run(
        &mut self,
        program: ProgramSource,
        inputs: &[TensorView],
        outputs: &[OutputOwnership],
        io: &mut dyn KernelIo,
    ) -> Result<Vec<TensorView>>;

    /// Custom data of the running kernel.
    fn current_kernel_custom_data(&mut self) -> Result<&mut KernelCustomData>;
}

/// Context handed to an operator's run function.
pub struct ComputeContext<'a> {
    runner: &'a mut dyn ProgramRunner,
    io: &'a mut dyn KernelIo,
}

impl<'a> ComputeContext<'a> {
    pub fn new(runner: &'a mut dyn ProgramRunner, io: &'a mut dyn KernelIo) -> Self {
        Self { runner, io }
    }

    pub fn inputs(&self) -> &[TensorView] {
        self.io.inputs()
    }

    /// Get an input by index.
    pub fn input(&self, index: usize) -> Result<&TensorView> {
        let inputs = self.io.inputs();
        inputs.get(index).ok_or_else(|| {
            Error::Execution(format!(
                "Input {index} not found (kernel has {} inputs)",
                inputs.len()
            ))
        })
    }

    pub fn output_count(&self) -> usize {
        self.io.output_count()
    }

    /// Dispatch a program against `inputs`.
    pub fn compute(
        &mut self,
        program: impl Into<ProgramSource>,
        inputs: &[TensorView],
        outputs: &[OutputOwnership],
    ) -> Result<Vec<TensorView>> {
        self.runner.run(program.into(), inputs, outputs, &mut *self.io)
    }

    /// Custom data of this kernel, kept across compute calls.
    pub fn custom_data(&mut self) -> Result<&mut KernelCustomData> {
        self.runner.current_kernel_custom_data()
    }
}
