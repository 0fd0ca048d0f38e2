//! # TANDEM
//!
//! The frame loop that keeps the simulation thread and the core thread in
//! lockstep.
//!
//! ```text
//!   SIMULATION THREAD                      CORE THREAD
//!   ─────────────────                      ───────────
//!   frame N   simulate ─ sync ─ submit ──► apply packets, render frame N
//!             wait(fence N-1)                        │
//!   frame N+1 simulate ─ sync ─ submit ──► ...       ▼ signal(fence N)
//!             wait(fence N) ◄────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: TOML configuration
//! - `frame_loop`: Frame orchestration and the handshake
//! - `pacing`: Sleep-then-spin frame pacing
//! - `stats`: Frame timing statistics

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod frame_loop;
pub mod pacing;
pub mod stats;

pub use tandem_core as core;
pub use tandem_rendering as rendering;
pub use tandem_shared as shared;

pub use config::FrameLoopConfig;
pub use error::{TandemError, TandemResult};
pub use frame_loop::{FrameContext, FrameHooks, FrameLoop, MAX_DELTA_TIME};
pub use pacing::FramePacer;
pub use stats::{FrameStats, FrameStatsAccumulator};
