//! Device buffers.
//!
//! Transfers are blocking and all-or-nothing: the host slice must cover the
//! buffer exactly. Before touching memory a transfer drains outstanding
//! work on the buffer's queue.

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use tracing::trace;

use crate::backend::BufferHandle;
use crate::context::Queue;
use crate::{ComputeError, ComputeResult};

/// How kernels may access a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Who keeps a buffer alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLifetime {
    /// Released at the end of the call that created it.
    Transient,
    /// Held by its owner across calls, never beyond context teardown.
    Persistent,
}

/// A buffer in one queue's device memory.
pub struct DeviceBuffer<'ctx> {
    queue: &'ctx Queue,
    handle: Arc<dyn BufferHandle>,
    size: u64,
    mode: AccessMode,
    lifetime: BufferLifetime,
}

impl<'ctx> DeviceBuffer<'ctx> {
    /// Allocate a zero-initialized buffer of `size_bytes`.
    pub fn allocate(queue: &'ctx Queue, size_bytes: u64, mode: AccessMode, lifetime: BufferLifetime) -> ComputeResult<Self> {
        trace!(queue = queue.index(), size_bytes, ?mode, ?lifetime, "DeviceBuffer::allocate");
        let handle: Arc<dyn BufferHandle> = Arc::from(queue.backend().allocate(size_bytes)?);
        Ok(Self {
            queue,
            handle,
            size: size_bytes,
            mode,
            lifetime,
        })
    }

    /// Allocate a buffer sized for `data` and upload it.
    pub fn from_slice<T: Pod>(queue: &'ctx Queue, data: &[T], mode: AccessMode, lifetime: BufferLifetime) -> ComputeResult<Self> {
        let buffer = Self::allocate(queue, std::mem::size_of_val(data) as u64, mode, lifetime)?;
        buffer.write(data)?;
        Ok(buffer)
    }

    /// Zero-initialized buffer holding `len` elements of `T`.
    pub fn zeroed<T: Pod>(queue: &'ctx Queue, len: usize, mode: AccessMode, lifetime: BufferLifetime) -> ComputeResult<Self> {
        Self::allocate(queue, (len * std::mem::size_of::<T>()) as u64, mode, lifetime)
    }

    /// Blocking host -> device copy of the whole buffer.
    pub fn write<T: Pod>(&self, data: &[T]) -> ComputeResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.check_len(bytes.len())?;
        self.queue.finish()?;
        self.queue.backend().write(self.handle.as_ref(), bytes)
    }

    /// Blocking device -> host copy of the whole buffer.
    pub fn read<T: Pod>(&self, out: &mut [T]) -> ComputeResult<()> {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
        self.check_len(bytes.len())?;
        self.queue.finish()?;
        self.queue.backend().read(self.handle.as_ref(), bytes)
    }

    /// Read the whole buffer into a new vector.
    pub fn read_vec<T: Pod>(&self) -> ComputeResult<Vec<T>> {
        let elem = std::mem::size_of::<T>().max(1);
        if self.size as usize % elem != 0 {
            return Err(ComputeError::BufferSizeMismatch {
                expected: self.size as usize,
                actual: (self.size as usize / elem) * elem,
            });
        }
        let mut out = vec![T::zeroed(); self.size as usize / elem];
        self.read(&mut out)?;
        Ok(out)
    }

    fn check_len(&self, len: usize) -> ComputeResult<()> {
        if len as u64 != self.size {
            return Err(ComputeError::BufferSizeMismatch {
                expected: self.size as usize,
                actual: len,
            });
        }
        Ok(())
    }

    pub fn size_bytes(&self) -> u64 {
        self.size
    }

    /// Element count for elements of `T`.
    pub fn len<T>(&self) -> usize {
        self.size as usize / std::mem::size_of::<T>().max(1)
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn lifetime(&self) -> BufferLifetime {
        self.lifetime
    }

    pub fn queue(&self) -> &'ctx Queue {
        self.queue
    }

    pub(crate) fn handle(&self) -> &Arc<dyn BufferHandle> {
        &self.handle
    }
}

impl Drop for DeviceBuffer<'_> {
    fn drop(&mut self) {
        trace!(queue = self.queue.index(), size_bytes = self.size, lifetime = ?self.lifetime, "Releasing device buffer");
    }
}

impl fmt::Debug for DeviceBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("queue", &self.queue.index())
            .field("size", &self.size)
            .field("mode", &self.mode)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}
