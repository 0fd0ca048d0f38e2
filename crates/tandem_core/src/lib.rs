//! # TANDEM Core
//!
//! Machinery that lets a scene entity live on two threads at once.
//!
//! ```text
//!   SIMULATION CONTEXT                         CORE CONTEXT
//!   ┌──────────────────┐   SyncPacket bytes   ┌──────────────────┐
//!   │ SimObject        │ ───────────────────► │ CoreObject       │
//!   │  (authoritative) │   (FrameAlloc)       │  (GPU mirror)    │
//!   │  dirty bits      │                      │  derived data    │
//!   └──────────────────┘                      └──────────────────┘
//!            │ queue()/submit()                        ▲
//!            └──────── CoreCommand batch ──────────────┘
//! ```
//!
//! ## Architecture Rules
//!
//! 1. **Core halves are never touched by simulation code** - all mutation is
//!    packet application on the core thread
//! 2. **No shared pointers between halves** - the link is a generation-checked
//!    [`Handle`]
//! 3. **Commands are values** - the core thread interprets [`CoreCommand`]s,
//!    never closures

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod context;
pub mod core_thread;
pub mod error;
pub mod memory;
pub mod sync;
pub mod workers;

pub use context::{assert_core_context, ExecutionContext};
pub use core_thread::{CoreCommand, CoreDispatch, CoreThread};
pub use error::{CoreError, CoreResult};
pub use memory::{FrameAlloc, FrameSlice, Handle, HandleArena};
pub use sync::{
    CoreLink, CoreObject, CoreObjectRegistry, DirtyFlags, Fence, SimObject, SimObjectRegistry,
    SyncBatch, SyncEntry, SyncPacketReader, SyncPacketWriter,
};
pub use workers::{JobHandle, WorkerPool, WorkerPoolStats};
