//! # Frame Loop
//!
//! One simulation frame:
//! ```text
//! Frame N:
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ 1. PACE                                                             │
//! │    └─ sleep, then spin, until frame N-1 used its budget             │
//! │                                                                     │
//! │ 2. SIMULATE                                                         │
//! │    ├─ Dispatch completion callbacks of finished tasks               │
//! │    └─ pre_update → update → post_update hooks                       │
//! │                                                                     │
//! │ 3. SYNC                                                             │
//! │    ├─ Build sync packets for dirty objects                          │
//! │    └─ Queue the sync point and the core frame                       │
//! │                                                                     │
//! │ 4. SUBMIT                                                           │
//! │    └─ Send the batch to the core thread, fenced                     │
//! │                                                                     │
//! │ 5. HANDSHAKE                                                        │
//! │    └─ Wait for frame N-1's fence (not N's), lending one worker      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The core thread renders frame N while the simulation runs frame N+1.
//! A core failure surfaces at the next handshake and halts the loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tandem_core::{Fence, WorkerPool};
use tandem_rendering::{create_backend, RenderWorld};
use tracing::{debug, error, info, warn};

use crate::config::FrameLoopConfig;
use crate::error::{TandemError, TandemResult};
use crate::pacing::FramePacer;
use crate::stats::{FrameStats, FrameStatsAccumulator};

/// Upper bound on the delta time handed to hooks, so a stall does not
/// turn into one huge simulation step.
pub const MAX_DELTA_TIME: f32 = 0.1;

/// Per-frame data handed to the hooks.
pub struct FrameContext<'a> {
    /// Frame number, starting at 0.
    pub frame: u64,
    /// Seconds since the previous frame, clamped to [`MAX_DELTA_TIME`].
    pub delta_time: f32,
    /// Background workers for parallel simulation work. Jobs spawned here
    /// also run while the loop blocks in the handshake.
    pub workers: &'a WorkerPool,
}

/// Application callbacks run during the simulate step, before sync.
///
/// Any error halts the loop.
pub trait FrameHooks {
    /// Runs before the scene update.
    ///
    /// # Errors
    ///
    /// Application-defined.
    fn pre_update(&mut self, _world: &mut RenderWorld, _ctx: &FrameContext<'_>) -> TandemResult<()> {
        Ok(())
    }

    /// Scene update.
    ///
    /// # Errors
    ///
    /// Application-defined.
    fn update(&mut self, _world: &mut RenderWorld, _ctx: &FrameContext<'_>) -> TandemResult<()> {
        Ok(())
    }

    /// Runs after the scene update.
    ///
    /// # Errors
    ///
    /// Application-defined.
    fn post_update(&mut self, _world: &mut RenderWorld, _ctx: &FrameContext<'_>) -> TandemResult<()> {
        Ok(())
    }
}

impl FrameHooks for () {}

/// Lockstep simulation/core frame coordinator.
pub struct FrameLoop<H: FrameHooks = ()> {
    config: FrameLoopConfig,
    world: RenderWorld,
    hooks: H,
    workers: WorkerPool,
    pacer: FramePacer,
    /// Fence of the frame the core thread may still be rendering.
    previous: Option<Arc<Fence>>,
    frame: u64,
    last_frame: Instant,
    halted: bool,
    stats: FrameStatsAccumulator,
}

impl<H: FrameHooks> FrameLoop<H> {
    /// Loads the configured backend and starts the core thread and the
    /// worker pool.
    ///
    /// # Errors
    ///
    /// [`TandemError::BackendUnavailable`] for an unknown backend name,
    /// [`TandemError::Core`] if a thread cannot start.
    pub fn new(config: FrameLoopConfig, hooks: H) -> TandemResult<Self> {
        let backend = create_backend(&config.backend)
            .ok_or_else(|| TandemError::BackendUnavailable(config.backend.clone()))?;
        let world = RenderWorld::new(backend, config.frame_alloc_bytes)?;

        // One worker stays parked until a handshake lends it out.
        let workers = WorkerPool::new(config.worker_threads)?;
        workers.remove_worker();

        let budget = config.frame_budget();
        info!(
            backend = %config.backend,
            fps_limit = config.fps_limit,
            workers = config.worker_threads,
            "frame loop started"
        );
        Ok(Self {
            pacer: FramePacer::new(budget, config.spin_threshold()),
            stats: FrameStatsAccumulator::new(budget),
            config,
            world,
            hooks,
            workers,
            previous: None,
            frame: 0,
            last_frame: Instant::now(),
            halted: false,
        })
    }

    /// Runs one frame.
    ///
    /// # Errors
    ///
    /// A hook or core failure. The loop is halted afterwards and every
    /// later call returns [`TandemError::Halted`].
    pub fn run_frame(&mut self) -> TandemResult<FrameStats> {
        if self.halted {
            return Err(TandemError::Halted);
        }
        match self.step() {
            Ok(stats) => {
                self.frame += 1;
                self.stats.record(stats);
                Ok(stats)
            }
            Err(e) => {
                error!(frame = self.frame, error = %e, "frame failed, halting");
                self.halted = true;
                Err(e)
            }
        }
    }

    /// Runs `frames` frames, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// As [`run_frame`](Self::run_frame).
    pub fn run(&mut self, frames: u64) -> TandemResult<()> {
        for _ in 0..frames {
            self.run_frame()?;
        }
        Ok(())
    }

    fn step(&mut self) -> TandemResult<FrameStats> {
        let pace = self.pacer.pace();
        let start = Instant::now();
        let delta_time = start
            .duration_since(self.last_frame)
            .as_secs_f32()
            .min(MAX_DELTA_TIME);
        self.last_frame = start;

        // Simulate
        let tasks_completed = self.world.poll_completions();
        let ctx = FrameContext {
            frame: self.frame,
            delta_time,
            workers: &self.workers,
        };
        self.hooks.pre_update(&mut self.world, &ctx)?;
        self.hooks.update(&mut self.world, &ctx)?;
        self.hooks.post_update(&mut self.world, &ctx)?;
        let simulated = Instant::now();

        // Sync + submit
        let sync_bytes = self.world.sync_to_core()?;
        self.world.queue_render_frame();
        let fence = self.world.submit_with_fence()?;
        let synced = Instant::now();

        // Handshake with the previous core frame
        if let Some(previous) = self.previous.replace(fence) {
            self.handshake(&previous)?;
        }
        let finished = Instant::now();

        let stats = FrameStats {
            frame: self.frame,
            total_us: micros(pace + (finished - start)),
            simulate_us: micros(simulated - start),
            sync_us: micros(synced - simulated),
            handshake_us: micros(finished - synced),
            pace_us: micros(pace),
            sync_bytes,
            tasks_completed,
        };
        debug!(
            frame = stats.frame,
            sync_bytes,
            handshake_us = stats.handshake_us,
            "frame done"
        );
        Ok(stats)
    }

    /// Blocks on `fence`, lending a worker to the pool for the duration.
    fn handshake(&self, fence: &Fence) -> TandemResult<()> {
        if fence.is_signaled() {
            self.world.check_core()?;
            return Ok(());
        }
        self.workers.add_worker()?;
        let result = self.wait_core(fence);
        self.workers.remove_worker();
        result
    }

    fn wait_core(&self, fence: &Fence) -> TandemResult<()> {
        let poll = self.config.handshake_poll().max(Duration::from_millis(1));
        while !fence.wait_timeout(poll) {
            self.world.check_core()?;
        }
        self.world.check_core()?;
        Ok(())
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &FrameLoopConfig {
        &self.config
    }

    /// The render world.
    #[must_use]
    pub const fn world(&self) -> &RenderWorld {
        &self.world
    }

    /// The render world, mutably.
    pub fn world_mut(&mut self) -> &mut RenderWorld {
        &mut self.world
    }

    /// The hooks.
    #[must_use]
    pub const fn hooks(&self) -> &H {
        &self.hooks
    }

    /// The hooks, mutably.
    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// The background worker pool.
    #[must_use]
    pub const fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Frames completed.
    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.frame
    }

    /// True once a frame failed.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    /// Accumulated statistics.
    #[must_use]
    pub const fn stats(&self) -> &FrameStatsAccumulator {
        &self.stats
    }

    /// Waits for the last submitted core frame, stops the core thread and
    /// returns the accumulated statistics.
    ///
    /// # Errors
    ///
    /// A core failure, including one from the last frame.
    pub fn shutdown(mut self) -> TandemResult<FrameStatsAccumulator> {
        if let Some(last) = self.previous.take() {
            if let Err(e) = self.world.wait_fence(&last) {
                warn!(error = %e, "last core frame failed");
                return Err(e.into());
            }
        }
        let renderer = self.world.shutdown()?;
        self.stats.log_summary();
        info!(
            frames = self.frame,
            core_frames = renderer.stats().frames,
            "frame loop stopped"
        );
        Ok(self.stats)
    }
}

fn micros(duration: Duration) -> u64 {
    duration.as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FrameLoopConfig {
        FrameLoopConfig {
            fps_limit: 0,
            worker_threads: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_frame_loop_creation() {
        let frame_loop = FrameLoop::new(config(), ()).unwrap();
        assert_eq!(frame_loop.frame_count(), 0);
        assert_eq!(frame_loop.workers().limit(), 1);
        frame_loop.shutdown().unwrap();
    }

    #[test]
    fn test_frame_cycle() {
        let mut frame_loop = FrameLoop::new(config(), ()).unwrap();
        let first = frame_loop.run_frame().unwrap();
        assert_eq!(first.frame, 0);
        assert_eq!(first.handshake_us, 0, "nothing to wait on in frame 0");
        frame_loop.run(3).unwrap();
        assert_eq!(frame_loop.frame_count(), 4);
        assert_eq!(frame_loop.workers().limit(), 1, "handshake returns its worker");

        let stats = frame_loop.shutdown().unwrap();
        assert_eq!(stats.frames_recorded, 4);
    }

    #[test]
    fn test_unknown_backend() {
        let config = FrameLoopConfig {
            backend: "vulkan".to_owned(),
            ..config()
        };
        assert!(matches!(
            FrameLoop::new(config, ()),
            Err(TandemError::BackendUnavailable(name)) if name == "vulkan"
        ));
    }

    #[test]
    fn test_hook_error_halts() {
        struct FailAt(u64);
        impl FrameHooks for FailAt {
            fn update(&mut self, _: &mut RenderWorld, ctx: &FrameContext<'_>) -> TandemResult<()> {
                if ctx.frame == self.0 {
                    return Err(TandemError::Config("hook failed".to_owned()));
                }
                Ok(())
            }
        }

        let mut frame_loop = FrameLoop::new(config(), FailAt(2)).unwrap();
        assert!(frame_loop.run(5).is_err());
        assert!(frame_loop.is_halted());
        assert_eq!(frame_loop.frame_count(), 2);
        assert!(matches!(frame_loop.run_frame(), Err(TandemError::Halted)));
    }
}
