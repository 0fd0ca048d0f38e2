//! # Simulation/Core Synchronization
//!
//! The protocol that keeps the two halves of a scene object in step:
//!
//! ```text
//! SIM FRAME N                                    CORE FRAME N
//! ───────────                                    ────────────
//! object.mark_dirty(bits)
//!   ...
//! registry.sync_to_core(alloc)
//!   for each dirty object:
//!     bits = dirty.take()         ──► SyncBatch ──► registry.apply(handle, bytes)
//!     write fields for bits                            read fields for bits
//! ```
//!
//! The packet format is position-coupled: the reader must read exactly what
//! the writer wrote, in the same order. Only the header (layout version and
//! the dirty bits) and collection counts are explicit.

pub mod dirty;
pub mod fence;
pub mod object;
pub mod packet;

pub use dirty::DirtyFlags;
pub use fence::Fence;
pub use object::{
    CoreLink, CoreObject, CoreObjectRegistry, SimObject, SimObjectRegistry, SyncBatch, SyncEntry,
};
pub use packet::{SyncPacketReader, SyncPacketWriter, SYNC_HEADER_SIZE, SYNC_LAYOUT_VERSION};
