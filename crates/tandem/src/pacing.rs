//! # Frame Pacing
//!
//! Holds frames to a target duration. Most of the wait is an OS sleep; the
//! last `spin_threshold` before the deadline is a busy wait, which keeps
//! the wake-up jitter well under one scheduler timeslice.
//!
//! ```text
//! frame start                         deadline
//!     │◄──────────── budget ───────────►│
//!     │  work  │      sleep      │ spin │
//!                                ▲
//!                   deadline - spin_threshold
//! ```

use std::time::{Duration, Instant};

/// Sleep-then-spin frame pacer.
#[derive(Debug)]
pub struct FramePacer {
    budget: Option<Duration>,
    spin_threshold: Duration,
    frame_start: Instant,
}

impl FramePacer {
    /// Creates a pacer. `budget = None` never waits.
    #[must_use]
    pub fn new(budget: Option<Duration>, spin_threshold: Duration) -> Self {
        Self {
            budget,
            spin_threshold,
            frame_start: Instant::now(),
        }
    }

    /// Target frame duration.
    #[must_use]
    pub const fn budget(&self) -> Option<Duration> {
        self.budget
    }

    /// Waits until the current frame has used its budget, then starts the
    /// next one. Returns the time spent waiting.
    pub fn pace(&mut self) -> Duration {
        let entered = Instant::now();
        if let Some(budget) = self.budget {
            let deadline = self.frame_start + budget;
            loop {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let remaining = deadline - now;
                if remaining > self.spin_threshold {
                    std::thread::sleep(remaining - self.spin_threshold);
                } else {
                    std::hint::spin_loop();
                }
            }
        }
        let now = Instant::now();
        self.frame_start = now;
        now - entered
    }

    /// Restarts the current frame now, discarding time already spent.
    pub fn reset(&mut self) {
        self.frame_start = Instant::now();
    }
}
