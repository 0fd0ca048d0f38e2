//! # Frame Loop Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an
//! empty file is a valid configuration.
//!
//! ```toml
//! fps_limit = 60          # 0 = run unpaced
//! spin_threshold_us = 2000
//! worker_threads = 2
//! backend = "headless"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tandem_rendering::DEFAULT_FRAME_ALLOC_BYTES;
use tandem_shared::{DEFAULT_FPS_LIMIT, DEFAULT_PROBES_PER_STEP, DEFAULT_SPIN_THRESHOLD_US};

use crate::error::{TandemError, TandemResult};

/// Configuration for [`FrameLoop`](crate::FrameLoop).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrameLoopConfig {
    /// Target frames per second. 0 disables pacing.
    pub fps_limit: u32,
    /// Remaining frame time below which the pacer spins instead of sleeping.
    pub spin_threshold_us: u64,
    /// Background worker threads.
    pub worker_threads: usize,
    /// Transient allocator size for one frame's sync packets.
    pub frame_alloc_bytes: usize,
    /// Light probes captured per frame by capture tasks (0 = all).
    pub probes_per_step: u32,
    /// Resource backend name.
    pub backend: String,
    /// How often a blocked handshake re-checks the core thread, in ms.
    pub handshake_poll_ms: u64,
}

impl Default for FrameLoopConfig {
    fn default() -> Self {
        Self {
            fps_limit: DEFAULT_FPS_LIMIT,
            spin_threshold_us: DEFAULT_SPIN_THRESHOLD_US,
            worker_threads: 2,
            frame_alloc_bytes: DEFAULT_FRAME_ALLOC_BYTES,
            probes_per_step: DEFAULT_PROBES_PER_STEP,
            backend: "headless".to_owned(),
            handshake_poll_ms: 50,
        }
    }
}

impl FrameLoopConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// [`TandemError::Config`] on malformed TOML or unknown keys.
    pub fn from_toml_str(text: &str) -> TandemResult<Self> {
        toml::from_str(text).map_err(|e| TandemError::Config(e.to_string()))
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// [`TandemError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> TandemResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Target frame duration, `None` when unpaced.
    #[must_use]
    pub fn frame_budget(&self) -> Option<Duration> {
        (self.fps_limit > 0).then(|| Duration::from_secs(1) / self.fps_limit)
    }

    /// Spin threshold as a duration.
    #[must_use]
    pub const fn spin_threshold(&self) -> Duration {
        Duration::from_micros(self.spin_threshold_us)
    }

    /// Handshake liveness poll interval.
    #[must_use]
    pub const fn handshake_poll(&self) -> Duration {
        Duration::from_millis(self.handshake_poll_ms)
    }
}
