//! GPU buffer ownership and data transfer.

use kiln_core::{BufferAllocator, BufferId, BufferUsage, Error, GpuDevice, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Buffer sizes are rounded up to this many bytes.
pub const BUFFER_ALIGNMENT: u64 = 16;

/// Round `size` up to [`BUFFER_ALIGNMENT`]. Zero-sized requests still get one
/// aligned block so every tensor view has a backing buffer.
pub fn normalize_size(size: u64) -> u64 {
    size.max(1).div_ceil(BUFFER_ALIGNMENT) * BUFFER_ALIGNMENT
}

/// Copy sizes must be a multiple of 4 bytes.
fn copy_size(size: u64) -> u64 {
    size.div_ceil(4) * 4
}

#[derive(Debug)]
struct StoredBuffer<B> {
    buffer: B,
    /// Size the buffer was requested with.
    original_size: u64,
    /// Allocated size; 0 for external buffers.
    normalized_size: u64,
    external: bool,
}

/// Owns the mapping from [`BufferId`] to device buffers.
///
/// Released buffers are not reusable straight away: commands recorded before
/// the release may still reference them. They wait on a pending list until
/// [`refresh_pending_buffers`](Self::refresh_pending_buffers) is called after
/// the next submission, then join a free pool keyed by size.
pub struct GpuDataManager<D: GpuDevice> {
    device: Arc<D>,
    next_id: u64,
    storage: HashMap<BufferId, StoredBuffer<D::Buffer>>,
    free_buffers: HashMap<u64, Vec<D::Buffer>>,
    pending_release: Vec<(u64, D::Buffer)>,
    pending_staging: Vec<D::Buffer>,
    /// External buffers by identity: id and registration count.
    external_buffers: HashMap<D::Buffer, (BufferId, usize)>,
}

impl<D: GpuDevice> GpuDataManager<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            next_id: 1,
            storage: HashMap::new(),
            free_buffers: HashMap::new(),
            pending_release: Vec::new(),
            pending_staging: Vec::new(),
            external_buffers: HashMap::new(),
        }
    }

    fn next_id(&mut self) -> BufferId {
        let id = BufferId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Allocate a storage buffer of at least `size` bytes.
    ///
    /// Storage buffers are bound whole, so the size is checked against the
    /// binding limit as well as the buffer limit.
    pub fn create(&mut self, size: u64) -> Result<BufferId> {
        let normalized = normalize_size(size);
        let limits = self.device.limits();
        let max = limits
            .max_buffer_size
            .min(limits.max_storage_buffer_binding_size);
        if normalized > max {
            return Err(Error::Device(format!(
                "Buffer of {size} bytes exceeds the device maximum of {max} bytes"
            )));
        }

        let buffer = match self
            .free_buffers
            .get_mut(&normalized)
            .and_then(|pool| pool.pop())
        {
            Some(buffer) => {
                trace!(size = normalized, "Reusing pooled buffer");
                buffer
            }
            None => self.device.create_buffer(normalized, BufferUsage::Storage),
        };

        let id = self.next_id();
        self.storage.insert(
            id,
            StoredBuffer {
                buffer,
                original_size: size,
                normalized_size: normalized,
                external: false,
            },
        );
        Ok(id)
    }

    /// Release a buffer and return its requested size.
    ///
    /// Unknown ids are ignored and report 0. External buffers belong to the
    /// sessions that registered them and are only dropped through
    /// [`unregister_external`](Self::unregister_external), so releasing one
    /// is ignored as well.
    pub fn release(&mut self, id: BufferId) -> u64 {
        match self.storage.get(&id) {
            None => {
                trace!(%id, "Release of unknown buffer ignored");
                return 0;
            }
            Some(stored) if stored.external => {
                trace!(%id, "Release of external buffer ignored");
                return 0;
            }
            Some(_) => {}
        }

        match self.storage.remove(&id) {
            Some(stored) => {
                self.pending_release
                    .push((stored.normalized_size, stored.buffer));
                stored.original_size
            }
            None => 0,
        }
    }

    /// Look up the device buffer behind `id`.
    pub fn get(&self, id: BufferId) -> Result<&D::Buffer> {
        self.storage
            .get(&id)
            .map(|stored| &stored.buffer)
            .ok_or(Error::MissingBuffer(id))
    }

    /// Requested size of a buffer.
    pub fn size_of(&self, id: BufferId) -> Option<u64> {
        self.storage.get(&id).map(|stored| stored.original_size)
    }

    /// Record an upload of `data` into `id`.
    ///
    /// The data goes through a staging buffer and is copied in command order,
    /// so dispatches recorded later in the same batch observe it.
    pub fn upload(&mut self, id: BufferId, data: &[u8], encoder: &mut D::Encoder) -> Result<()> {
        let stored = self.storage.get(&id).ok_or(Error::MissingBuffer(id))?;
        let capacity = self.device.buffer_size(&stored.buffer);
        let size = copy_size(data.len() as u64);
        if size > capacity {
            return Err(Error::BufferSizeMismatch {
                source_size: data.len() as u64,
                destination_size: stored.original_size,
            });
        }
        if data.is_empty() {
            return Ok(());
        }

        let mut padded = data.to_vec();
        padded.resize(size as usize, 0);

        let staging = self.device.create_buffer_init(&padded, BufferUsage::Upload);
        self.device
            .copy_buffer(encoder, &staging, &stored.buffer, size);
        self.pending_staging.push(staging);
        trace!(%id, bytes = data.len(), "Recorded upload");
        Ok(())
    }

    /// Record a copy from `source` to `destination`. Both must have the same
    /// requested size.
    pub fn memcpy(
        &self,
        source: BufferId,
        destination: BufferId,
        encoder: &mut D::Encoder,
    ) -> Result<()> {
        let src = self.storage.get(&source).ok_or(Error::MissingBuffer(source))?;
        let dst = self
            .storage
            .get(&destination)
            .ok_or(Error::MissingBuffer(destination))?;

        if src.original_size != dst.original_size {
            return Err(Error::BufferSizeMismatch {
                source_size: src.original_size,
                destination_size: dst.original_size,
            });
        }
        if src.original_size == 0 {
            return Ok(());
        }

        self.device.copy_buffer(
            encoder,
            &src.buffer,
            &dst.buffer,
            copy_size(src.original_size),
        );
        Ok(())
    }

    /// Record a copy of `id` into a fresh readback buffer.
    ///
    /// Returns the readback buffer and the number of meaningful bytes in it.
    /// The caller submits, reads it back and destroys it.
    pub fn stage_download(
        &self,
        id: BufferId,
        encoder: &mut D::Encoder,
    ) -> Result<(D::Buffer, u64)> {
        let stored = self.storage.get(&id).ok_or(Error::MissingBuffer(id))?;
        let size = copy_size(stored.original_size.max(4));
        let staging = self.device.create_buffer(size, BufferUsage::Readback);
        self.device
            .copy_buffer(encoder, &stored.buffer, &staging, size);
        Ok((staging, stored.original_size))
    }

    /// Register a caller-owned buffer and return its id.
    ///
    /// Registration is counted by buffer identity: registering the same buffer
    /// again returns the same id. When `previous` is the buffer this slot held
    /// before, it is either kept (same buffer, no new registration) or
    /// unregistered (replaced).
    pub fn register_external(
        &mut self,
        raw: D::Buffer,
        size: u64,
        previous: Option<&D::Buffer>,
    ) -> BufferId {
        if let Some(previous) = previous {
            if *previous == raw {
                if let Some((id, _)) = self.external_buffers.get(&raw) {
                    return *id;
                }
            } else {
                self.unregister_external(previous);
            }
        }

        if let Some((id, count)) = self.external_buffers.get_mut(&raw) {
            *count += 1;
            return *id;
        }

        let id = self.next_id();
        self.storage.insert(
            id,
            StoredBuffer {
                buffer: raw.clone(),
                original_size: size,
                normalized_size: 0,
                external: true,
            },
        );
        self.external_buffers.insert(raw, (id, 1));
        debug!(%id, size, "Registered external buffer");
        id
    }

    /// Drop one registration of an external buffer. The id is forgotten once
    /// no registrations remain; the buffer itself is never destroyed.
    pub fn unregister_external(&mut self, raw: &D::Buffer) {
        let Some((id, count)) = self.external_buffers.get_mut(raw) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            let id = *id;
            self.external_buffers.remove(raw);
            self.storage.remove(&id);
            debug!(%id, "Unregistered external buffer");
        }
    }

    /// Make buffers released before the last submission reusable and destroy
    /// consumed staging buffers.
    pub fn refresh_pending_buffers(&mut self) {
        for (size, buffer) in self.pending_release.drain(..) {
            self.free_buffers.entry(size).or_default().push(buffer);
        }
        for staging in self.pending_staging.drain(..) {
            self.device.destroy_buffer(&staging);
        }
    }

    /// Destroy every buffer this manager owns. External buffers are only forgotten.
    pub fn destroy_all(&mut self) {
        let owned = self
            .storage
            .drain()
            .filter(|(_, stored)| !stored.external)
            .map(|(_, stored)| stored.buffer);
        let pooled = self.free_buffers.drain().flat_map(|(_, pool)| pool);
        let pending = self.pending_release.drain(..).map(|(_, buffer)| buffer);

        for buffer in owned
            .chain(pooled)
            .chain(pending)
            .chain(self.pending_staging.drain(..))
        {
            self.device.destroy_buffer(&buffer);
        }
        self.external_buffers.clear();
    }

    /// Number of live buffer ids, external ones included.
    pub fn buffer_count(&self) -> usize {
        self.storage.len()
    }

    /// Number of buffers waiting in the free pool.
    pub fn free_buffer_count(&self) -> usize {
        self.free_buffers.values().map(Vec::len).sum()
    }

    /// Number of released buffers waiting for the next submission.
    pub fn pending_release_count(&self) -> usize {
        self.pending_release.len()
    }

    pub fn external_count(&self) -> usize {
        self.external_buffers.len()
    }
}

impl<D: GpuDevice> BufferAllocator for GpuDataManager<D> {
    fn allocate(&mut self, size: u64) -> Result<BufferId> {
        self.create(size)
    }
}
