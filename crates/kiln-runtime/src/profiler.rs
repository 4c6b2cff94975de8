//! Pass-level GPU timing with timestamp queries.
//!
//! Every compute pass gets a begin/end timestamp pair while query slots
//! remain. Queries are resolved into a readback buffer on each submission
//! and read with [`PassProfiler::read`], which also resets the profiler.

use crate::error::{Result, RuntimeError};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::trace;

/// GPU time spent in one compute pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassTiming {
    /// Labels of the pipelines dispatched in the pass, comma separated.
    pub label: String,
    pub duration: Duration,
}

pub struct PassProfiler {
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    destination_buffer: wgpu::Buffer,
    /// Dispatch labels of each timed pass, in pass order.
    passes: Mutex<Vec<Vec<String>>>,
    max_passes: u32,
}

impl PassProfiler {
    pub fn new(device: &wgpu::Device, max_passes: u32) -> Self {
        let query_count = max_passes * 2;
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("kiln pass timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: query_count,
        });

        let resolve_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kiln timestamp resolve"),
            size: query_count as u64 * 8,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let destination_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kiln timestamp readback"),
            size: query_count as u64 * 8,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            query_set,
            resolve_buffer,
            destination_buffer,
            passes: Mutex::new(Vec::new()),
            max_passes,
        }
    }

    fn passes(&self) -> MutexGuard<'_, Vec<Vec<String>>> {
        self.passes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve a timestamp pair for a new pass. `None` once every slot is
    /// taken; the pass then runs untimed.
    pub fn reserve_pass(&self) -> Option<u32> {
        let mut passes = self.passes();
        let index = passes.len() as u32;
        if index >= self.max_passes {
            trace!(max_passes = self.max_passes, "Timestamp slots exhausted");
            return None;
        }
        passes.push(Vec::new());
        Some(index)
    }

    pub fn timestamp_writes(&self, pass: u32) -> wgpu::ComputePassTimestampWrites<'_> {
        wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(pass * 2),
            end_of_pass_write_index: Some(pass * 2 + 1),
        }
    }

    pub fn note_dispatch(&self, pass: u32, label: &str) {
        if let Some(labels) = self.passes().get_mut(pass as usize) {
            labels.push(label.to_string());
        }
    }

    /// Record query resolution into `encoder`. Call before finishing it.
    pub fn resolve(&self, encoder: &mut wgpu::CommandEncoder) {
        let count = self.passes().len() as u32 * 2;
        if count == 0 {
            return;
        }

        encoder.resolve_query_set(&self.query_set, 0..count, &self.resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(
            &self.resolve_buffer,
            0,
            &self.destination_buffer,
            0,
            count as u64 * 8,
        );
    }

    /// Read the timings of every pass timed since the last call.
    ///
    /// Only passes whose encoder has been submitted hold valid results.
    pub async fn read(&self, device: &wgpu::Device, period_ns: f32) -> Result<Vec<PassTiming>> {
        let labels = std::mem::take(&mut *self.passes());
        if labels.is_empty() {
            return Ok(Vec::new());
        }

        let slice = self
            .destination_buffer
            .slice(0..labels.len() as u64 * 16);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });

        device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| RuntimeError::ProfilerError(format!("GPU poll failed: {e}")))?;
        receiver
            .await
            .map_err(|_| RuntimeError::ProfilerError("Map callback dropped".to_string()))??;

        let timestamps: Vec<u64> = bytemuck::pod_collect_to_vec(&slice.get_mapped_range()[..]);
        self.destination_buffer.unmap();

        Ok(labels
            .into_iter()
            .enumerate()
            .map(|(i, dispatches)| {
                let ticks = timestamps[i * 2 + 1].saturating_sub(timestamps[i * 2]);
                PassTiming {
                    label: dispatches.join(", "),
                    duration: Duration::from_nanos((ticks as f64 * period_ns as f64) as u64),
                }
            })
            .collect())
    }
}
