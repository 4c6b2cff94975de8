//! Command batching.

use kiln_core::GpuDevice;

/// The open command recording context of a backend.
///
/// Idle until something is recorded; then holds one encoder and at most one
/// compute pass. The pass is opened lazily on the first dispatch and closed
/// whenever a copy must be recorded or the batch is finished.
pub struct CommandBatch<D: GpuDevice> {
    encoder: Option<D::Encoder>,
    pass: Option<D::Pass>,
    pending_dispatches: usize,
}

impl<D: GpuDevice> Default for CommandBatch<D> {
    fn default() -> Self {
        Self {
            encoder: None,
            pass: None,
            pending_dispatches: 0,
        }
    }
}

impl<D: GpuDevice> CommandBatch<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn has_open_pass(&self) -> bool {
        self.pass.is_some()
    }

    /// Dispatches recorded since the last flush.
    pub fn pending_dispatches(&self) -> usize {
        self.pending_dispatches
    }

    /// The encoder, ready for copy commands. Closes the open pass.
    pub fn encoder(&mut self, device: &D) -> &mut D::Encoder {
        self.end_compute_pass(device);
        self.encoder
            .get_or_insert_with(|| device.create_command_encoder())
    }

    /// The open compute pass, opening an encoder and a pass if needed.
    pub fn compute_pass(&mut self, device: &D) -> &mut D::Pass {
        let encoder = &mut self.encoder;
        self.pass.get_or_insert_with(|| {
            let encoder = encoder.get_or_insert_with(|| device.create_command_encoder());
            device.begin_compute_pass(encoder)
        })
    }

    pub fn end_compute_pass(&mut self, device: &D) {
        if let Some(pass) = self.pass.take() {
            device.end_compute_pass(pass);
        }
    }

    /// Count a dispatch recorded into the pass; returns the new count.
    pub fn record_dispatch(&mut self) -> usize {
        self.pending_dispatches += 1;
        self.pending_dispatches
    }

    /// Close the batch and hand back the encoder for submission.
    ///
    /// Returns `None` when idle.
    pub fn finish(&mut self, device: &D) -> Option<D::Encoder> {
        self.end_compute_pass(device);
        self.pending_dispatches = 0;
        self.encoder.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;
    use kiln_core::BufferUsage;

    #[test]
    fn test_idle_finish_is_none() {
        let device = HeadlessDevice::default();
        let mut batch = CommandBatch::<HeadlessDevice>::new();
        assert!(!batch.is_recording());
        assert!(batch.finish(&device).is_none());
    }

    #[test]
    fn test_pass_opened_lazily_and_closed_for_copies() {
        let device = HeadlessDevice::default();
        let mut batch = CommandBatch::<HeadlessDevice>::new();

        batch.compute_pass(&device);
        batch.record_dispatch();
        assert!(batch.is_recording());
        assert!(batch.has_open_pass());

        let a = device.create_buffer(4, BufferUsage::Storage);
        let b = device.create_buffer(4, BufferUsage::Storage);
        let scope = device.push_validation_scope();
        device.copy_buffer(batch.encoder(&device), &a, &b, 4);
        assert!(!batch.has_open_pass());
        assert_eq!(pollster::block_on(device.pop_validation_scope(scope)), None);

        assert_eq!(batch.pending_dispatches(), 1);
        let encoder = batch.finish(&device);
        assert!(encoder.is_some());
        assert_eq!(batch.pending_dispatches(), 0);
        assert!(!batch.is_recording());
    }
}
