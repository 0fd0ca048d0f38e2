//! # Memory
//!
//! - [`FrameAlloc`]: per-frame bump storage for sync packets
//! - [`HandleArena`]: generation-checked slots, the link between the two
//!   halves of a scene object and the key of every GPU resource

pub mod frame_alloc;
pub mod handles;

pub use frame_alloc::{FrameAlloc, FrameSlice};
pub use handles::{Handle, HandleArena};
