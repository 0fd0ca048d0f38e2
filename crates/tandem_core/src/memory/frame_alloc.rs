//! # Frame Allocator
//!
//! A bump allocator holding one frame's sync packets.
//!
//! Allocations hand out [`FrameSlice`] descriptors instead of references, so
//! the allocator can travel to the core thread with the packets inside it.
//! Each [`clear`](FrameAlloc::clear) bumps an epoch; slices from an earlier
//! epoch are rejected instead of reading recycled bytes.

use crate::error::{CoreError, CoreResult};

/// Location of one allocation inside a [`FrameAlloc`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSlice {
    offset: usize,
    len: usize,
    epoch: u64,
}

impl FrameSlice {
    /// Size of the allocation in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True for zero-sized allocations.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A bump-pointer allocator for one frame of packet data.
///
/// # Thread Safety
///
/// Owned by one thread at a time. The simulation thread fills it, the core
/// thread reads it, clears it and sends it back for reuse.
///
/// # Example
///
/// ```rust,ignore
/// let mut alloc = FrameAlloc::new(64 * 1024);
/// let slice = alloc.alloc(16);
/// alloc.bytes_mut(slice)?.copy_from_slice(&[0u8; 16]);
/// alloc.clear(); // `slice` is now stale
/// ```
#[derive(Debug)]
pub struct FrameAlloc {
    storage: Vec<u8>,
    epoch: u64,
}

impl FrameAlloc {
    /// Creates an allocator that can hold `capacity` bytes before growing.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: Vec::with_capacity(capacity),
            epoch: 0,
        }
    }

    /// Bytes allocated since the last clear.
    #[inline]
    #[must_use]
    pub fn used(&self) -> usize {
        self.storage.len()
    }

    /// Bytes reserved.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Current epoch (number of clears so far).
    #[inline]
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Allocates `size` zeroed bytes. Grows the backing store if needed.
    pub fn alloc(&mut self, size: usize) -> FrameSlice {
        let offset = self.storage.len();
        self.storage.resize(offset + size, 0);
        FrameSlice {
            offset,
            len: size,
            epoch: self.epoch,
        }
    }

    /// Reads an allocation.
    ///
    /// # Errors
    ///
    /// [`CoreError::StaleFrameSlice`] if the allocator was cleared since the
    /// slice was handed out.
    pub fn bytes(&self, slice: FrameSlice) -> CoreResult<&[u8]> {
        self.check(slice)?;
        Ok(&self.storage[slice.offset..slice.offset + slice.len])
    }

    /// Writes an allocation.
    ///
    /// # Errors
    ///
    /// [`CoreError::StaleFrameSlice`] if the slice is from an earlier epoch.
    pub fn bytes_mut(&mut self, slice: FrameSlice) -> CoreResult<&mut [u8]> {
        self.check(slice)?;
        Ok(&mut self.storage[slice.offset..slice.offset + slice.len])
    }

    /// Frees every allocation at once. Capacity is kept.
    #[inline]
    pub fn clear(&mut self) {
        self.storage.clear();
        self.epoch += 1;
    }

    fn check(&self, slice: FrameSlice) -> CoreResult<()> {
        if slice.epoch != self.epoch {
            return Err(CoreError::StaleFrameSlice {
                slice_epoch: slice.epoch,
                current_epoch: self.epoch,
            });
        }
        Ok(())
    }
}
