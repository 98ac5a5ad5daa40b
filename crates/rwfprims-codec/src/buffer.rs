use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use tracing::debug;

use crate::error::{CodecError, Result};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// A contiguous byte region with an authoritative length.
///
/// `capacity()` is the number of bytes allocated; `len()` is how many of
/// them are meaningful, as recorded by [`WireBuffer::set_actual_length`].
/// Buffers come from a [`BufferPool`] and go back to the pool that made them.
pub struct WireBuffer {
    data: BytesMut,
    length: usize,
    pool: u64,
}

impl WireBuffer {
    /// Allocated size in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of meaningful bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Record how many of the allocated bytes are meaningful.
    pub fn set_actual_length(&mut self, length: usize) -> Result<()> {
        if length > self.capacity() {
            return Err(CodecError::LengthExceedsCapacity {
                length,
                capacity: self.capacity(),
            });
        }
        self.length = length;
        Ok(())
    }

    /// The meaningful bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// The whole allocation, for encoders to write into.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }
}

impl std::fmt::Debug for WireBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireBuffer")
            .field("capacity", &self.capacity())
            .field("length", &self.length)
            .field("pool", &self.pool)
            .finish()
    }
}

/// A [`WireBuffer`] released to a pool that did not allocate it.
#[derive(Debug, thiserror::Error)]
#[error("buffer released to a pool that did not allocate it")]
pub struct ForeignBuffer(WireBuffer);

impl ForeignBuffer {
    /// Take the rejected buffer back.
    pub fn into_buffer(self) -> WireBuffer {
        self.0
    }
}

impl From<ForeignBuffer> for CodecError {
    fn from(_: ForeignBuffer) -> Self {
        CodecError::ForeignBuffer
    }
}

/// Hands out [`WireBuffer`]s up to a fixed number outstanding.
///
/// Up to `guaranteed` released allocations are kept for reuse. Releasing
/// consumes the buffer, so a buffer cannot be released twice.
pub struct BufferPool {
    id: u64,
    guaranteed: usize,
    max: usize,
    outstanding: usize,
    free: Vec<BytesMut>,
}

impl BufferPool {
    /// Create a pool. `max` is raised to `guaranteed` if smaller.
    pub fn new(guaranteed: usize, max: usize) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            guaranteed,
            max: max.max(guaranteed),
            outstanding: 0,
            free: Vec::new(),
        }
    }

    /// Allocate a zeroed buffer of `size` bytes with `len() == size`.
    pub fn allocate(&mut self, size: usize) -> Result<WireBuffer> {
        if self.outstanding >= self.max {
            debug!(max = self.max, "buffer pool exhausted");
            return Err(CodecError::PoolExhausted { max: self.max });
        }

        let mut data = self.free.pop().unwrap_or_default();
        data.clear();
        data.resize(size, 0);
        self.outstanding += 1;

        Ok(WireBuffer {
            data,
            length: size,
            pool: self.id,
        })
    }

    /// Return a buffer to the pool.
    ///
    /// A buffer from another pool is handed back inside the error so it can
    /// still be released to the pool that owns it.
    pub fn release(&mut self, buffer: WireBuffer) -> std::result::Result<(), ForeignBuffer> {
        if !self.owns(&buffer) {
            return Err(ForeignBuffer(buffer));
        }
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.free.len() < self.guaranteed {
            self.free.push(buffer.data);
        }
        Ok(())
    }

    /// Whether `buffer` was allocated by this pool.
    pub fn owns(&self, buffer: &WireBuffer) -> bool {
        buffer.pool == self.id
    }

    /// Buffers currently allocated and not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Buffers that can still be allocated.
    pub fn available(&self) -> usize {
        self.max - self.outstanding
    }

    pub fn guaranteed(&self) -> usize {
        self.guaranteed
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("guaranteed", &self.guaranteed)
            .field("max", &self.max)
            .field("outstanding", &self.outstanding)
            .finish()
    }
}
