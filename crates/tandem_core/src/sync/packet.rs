//! # Sync Packet Codec
//!
//! ```text
//! ┌─────────┬────────────┬──────────────────────────────────────┐
//! │ version │ dirty bits │ fields, in the object's fixed order  │
//! │   u8    │    u32     │ (only those selected by dirty bits)  │
//! └─────────┴────────────┴──────────────────────────────────────┘
//! ```
//!
//! Values are `Pod` copies, little-endian as the host lays them out; both
//! ends run in the same process. No alignment is assumed on read.

use bytemuck::Pod;

use crate::error::{CoreError, CoreResult};

/// Layout version written into every packet header.
pub const SYNC_LAYOUT_VERSION: u8 = 1;

/// Header size in bytes: version (u8) + dirty bits (u32).
pub const SYNC_HEADER_SIZE: usize = 1 + std::mem::size_of::<u32>();

/// Serialized size of a `Pod` value.
#[inline]
#[must_use]
pub const fn packed_size<T: Pod>() -> usize {
    std::mem::size_of::<T>()
}

/// Writes a packet into a buffer sized in advance.
///
/// Overrunning the buffer means the object's size computation disagrees with
/// its writer, which is a bug, so it panics.
#[derive(Debug)]
pub struct SyncPacketWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SyncPacketWriter<'a> {
    /// Wraps a destination buffer.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Writes the packet header.
    pub fn write_header(&mut self, dirty: u32) {
        self.write(&SYNC_LAYOUT_VERSION);
        self.write(&dirty);
    }

    /// Appends a `Pod` value.
    ///
    /// # Panics
    ///
    /// If the buffer has no room for it.
    pub fn write<T: Pod>(&mut self, value: &T) {
        let bytes = bytemuck::bytes_of(value);
        let end = self.pos + bytes.len();
        assert!(
            end <= self.buf.len(),
            "Sync packet overrun: writing {} bytes at {} of {}",
            bytes.len(),
            self.pos,
            self.buf.len()
        );
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
    }

    /// Appends a bool as one byte.
    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.write(&u8::from(value));
    }

    /// Bytes written so far.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Finishes the packet and returns its length.
    ///
    /// # Panics
    ///
    /// If fewer bytes were written than were reserved.
    pub fn finish(self) -> usize {
        assert_eq!(
            self.pos,
            self.buf.len(),
            "Sync packet size mismatch: reserved {} bytes, wrote {}",
            self.buf.len(),
            self.pos
        );
        self.pos
    }
}

/// Reads a packet in the order it was written.
#[derive(Debug)]
pub struct SyncPacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SyncPacketReader<'a> {
    /// Wraps packet bytes.
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Reads and validates the header, returning the dirty bits.
    ///
    /// # Errors
    ///
    /// Underflow, or [`CoreError::LayoutVersion`] for a foreign layout.
    pub fn read_header(&mut self) -> CoreResult<u32> {
        let version: u8 = self.read()?;
        if version != SYNC_LAYOUT_VERSION {
            return Err(CoreError::LayoutVersion {
                expected: SYNC_LAYOUT_VERSION,
                found: version,
            });
        }
        self.read()
    }

    /// Reads the next `Pod` value.
    ///
    /// # Errors
    ///
    /// [`CoreError::PacketUnderflow`] if the packet is too short.
    pub fn read<T: Pod>(&mut self) -> CoreResult<T> {
        let size = packed_size::<T>();
        if self.remaining() < size {
            return Err(CoreError::PacketUnderflow {
                needed: size,
                remaining: self.remaining(),
            });
        }
        let value = bytemuck::pod_read_unaligned(&self.buf[self.pos..self.pos + size]);
        self.pos += size;
        Ok(value)
    }

    /// Reads a bool written by [`SyncPacketWriter::write_bool`].
    ///
    /// # Errors
    ///
    /// Underflow, or [`CoreError::InvalidEnum`] for a byte other than 0/1.
    pub fn read_bool(&mut self) -> CoreResult<bool> {
        match self.read::<u8>()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CoreError::InvalidEnum {
                field: "bool",
                value: u32::from(other),
            }),
        }
    }

    /// Unread byte count.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Errors unless every byte was consumed.
    ///
    /// # Errors
    ///
    /// [`CoreError::TrailingBytes`].
    pub fn finish(&self) -> CoreResult<()> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(CoreError::TrailingBytes { remaining }),
        }
    }
}
