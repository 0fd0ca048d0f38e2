//! # Core Error Types
//!
//! Runtime failures of the synchronization machinery. Contract violations
//! (wrong thread, double registration) are assertions, not errors.

use thiserror::Error;

use crate::memory::Handle;

/// Errors raised while building, transporting or applying sync data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A reader asked for more bytes than the packet holds.
    #[error("sync packet underflow: needed {needed} bytes, {remaining} remaining")]
    PacketUnderflow {
        /// Bytes requested.
        needed: usize,
        /// Bytes left in the packet.
        remaining: usize,
    },

    /// A packet was not fully consumed by the object that read it.
    #[error("sync packet has {remaining} trailing bytes")]
    TrailingBytes {
        /// Unread byte count.
        remaining: usize,
    },

    /// An encoded tag did not map to a known variant.
    #[error("invalid value {value} for {field}")]
    InvalidEnum {
        /// Field being decoded.
        field: &'static str,
        /// Raw value found.
        value: u32,
    },

    /// Packet written by an incompatible layout.
    #[error("sync layout version mismatch: expected {expected}, found {found}")]
    LayoutVersion {
        /// Version this build reads.
        expected: u8,
        /// Version found in the packet.
        found: u8,
    },

    /// A frame slice was read after its allocator was cleared.
    #[error("frame slice from epoch {slice_epoch} used at allocator epoch {current_epoch}")]
    StaleFrameSlice {
        /// Epoch the slice was allocated in.
        slice_epoch: u64,
        /// Current allocator epoch.
        current_epoch: u64,
    },

    /// No live object for the handle (never created, or already destroyed).
    #[error("unknown object {0}")]
    UnknownObject(Handle),

    /// The object behind a handle is not of the requested type.
    #[error("object {handle} is not a {expected}")]
    TypeMismatch {
        /// Handle looked up.
        handle: Handle,
        /// Type name requested.
        expected: &'static str,
    },

    /// The core thread could not be started.
    #[error("failed to spawn core thread: {0}")]
    ThreadSpawn(String),

    /// The core thread has exited (panic or shutdown).
    #[error("core thread is no longer running")]
    CoreThreadGone,
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
