//! A ready-made [`KernelIo`].

use kiln_core::{BufferAllocator, DataType, Error, KernelIo, Result, TensorView};

/// Kernel context over a fixed set of inputs.
///
/// Kernel outputs are allocated through the backend's allocator on request and
/// kept here; the caller owns them and frees them with
/// [`Backend::free`](crate::Backend::free).
#[derive(Debug, Clone)]
pub struct SimpleKernelIo {
    inputs: Vec<TensorView>,
    outputs: Vec<Option<TensorView>>,
}

impl SimpleKernelIo {
    pub fn new(inputs: Vec<TensorView>, output_count: usize) -> Self {
        Self {
            inputs,
            outputs: vec![None; output_count],
        }
    }

    /// Output `index`, if the kernel created it.
    pub fn output(&self, index: usize) -> Option<&TensorView> {
        self.outputs.get(index).and_then(Option::as_ref)
    }

    pub fn outputs(&self) -> &[Option<TensorView>] {
        &self.outputs
    }

    pub fn into_outputs(self) -> Vec<Option<TensorView>> {
        self.outputs
    }
}

impl KernelIo for SimpleKernelIo {
    fn inputs(&self) -> &[TensorView] {
        &self.inputs
    }

    fn output_count(&self) -> usize {
        self.outputs.len()
    }

    fn create_output(
        &mut self,
        index: usize,
        dtype: DataType,
        dims: &[usize],
        allocator: &mut dyn BufferAllocator,
    ) -> Result<TensorView> {
        let output_count = self.outputs.len();
        let slot = self
            .outputs
            .get_mut(index)
            .ok_or(Error::InvalidOutputIndex {
                index,
                output_count,
            })?;

        // A kernel that writes the same output twice gets the same buffer back
        if let Some(existing) = slot {
            if existing.dtype == dtype && existing.dims == dims {
                return Ok(existing.clone());
            }
            return Err(Error::Shape(format!(
                "Output {index} already created as {:?} {}, requested {dims:?} {dtype}",
                existing.dims, existing.dtype
            )));
        }

        let size = (dims.iter().product::<usize>() * dtype.size()) as u64;
        let view = TensorView::new(allocator.allocate(size)?, dtype, dims);
        *slot = Some(view.clone());
        Ok(view)
    }
}
