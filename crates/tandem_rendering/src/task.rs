//! # Renderer Tasks
//!
//! A unit of GPU-bound work that may need several frames to finish.
//!
//! ```text
//!            schedule()              work step: done
//!   Idle ──────────────► Running ────────────────────► Complete
//!    │                      │
//!    │ cancel()             │ cancel()
//!    ▼                      ▼
//!  Canceled ◄───────────────┘
//! ```
//!
//! The issuer (simulation side) and the task processor (core side) share a
//! task through an `Arc`. State lives in an atomic so either side can read
//! it without locking. Cancellation is cooperative: the processor checks the
//! state before each step, and long steps can poll
//! [`TaskEnv::is_canceled`] between units of work.
//!
//! A completion stays pending until the scheduler dispatches its callback.
//! Canceling in that window turns `Complete` into `Canceled` and the
//! callback never fires for it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tandem_core::{CoreObjectRegistry, Handle};
use tracing::{debug, trace, warn};

use crate::ibl::RenderBackend;
use crate::light_probe::CoreLightProbeVolume;
use crate::reflection_probe::CoreReflectionProbe;
use crate::renderer::CoreRenderer;
use crate::scene::RendererScene;
use crate::skybox::CoreSkybox;

/// Shared reference to a task.
pub type TaskRef = Arc<RendererTask>;

/// Lifecycle state of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Queued (or not yet scheduled); no step has run.
    Idle = 0,
    /// Picked up by the processor; steps are running.
    Running = 1,
    /// Finished.
    Complete = 2,
    /// Canceled by the issuer. Terminal.
    Canceled = 3,
}

impl TaskState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Complete,
            _ => Self::Canceled,
        }
    }
}

/// What a core-side task step has access to.
pub struct TaskEnv<'a> {
    /// Core halves of every scene object.
    pub objects: &'a mut CoreObjectRegistry<CoreRenderer>,
    /// The loaded backend.
    pub backend: &'a mut dyn RenderBackend,
    /// Scene registrations, for change notifications.
    pub scene: &'a mut RendererScene,
    state: &'a AtomicU8,
}

impl<'a> TaskEnv<'a> {
    /// Bundles the step inputs for the task whose state is `state`.
    pub(crate) fn new(
        objects: &'a mut CoreObjectRegistry<CoreRenderer>,
        backend: &'a mut dyn RenderBackend,
        scene: &'a mut RendererScene,
        state: &'a AtomicU8,
    ) -> Self {
        Self {
            objects,
            backend,
            scene,
            state,
        }
    }

    /// True once the issuer has canceled the running task.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.state.load(Ordering::Acquire) == TaskState::Canceled as u8
    }
}

/// Step function of a custom task. Returns `true` when finished.
pub type CustomWork = Box<dyn FnMut(&mut TaskEnv<'_>) -> bool + Send>;

/// The work a task performs, one step per call.
pub enum TaskWork {
    /// Capture and filter dirty probes of a light probe volume, at most
    /// `max_per_step` per step (0 = all).
    RenderLightProbes {
        /// Volume to render.
        volume: Handle,
        /// Probe budget per step.
        max_per_step: u32,
    },
    /// Filter a skybox texture into radiance and irradiance maps.
    FilterSkybox {
        /// Skybox to filter.
        skybox: Handle,
    },
    /// Capture the scene around a reflection probe and filter it.
    CaptureReflectionProbe {
        /// Probe to capture.
        probe: Handle,
    },
    /// Filter a reflection probe's custom texture.
    FilterReflectionProbe {
        /// Probe to filter.
        probe: Handle,
    },
    /// Arbitrary step function.
    Custom(CustomWork),
}

impl TaskWork {
    /// Runs one step. Returns `true` when the task is finished.
    ///
    /// A target that no longer exists finishes the task; its issuer
    /// destroyed the object mid-flight.
    pub fn step(&mut self, env: &mut TaskEnv<'_>) -> bool {
        match self {
            Self::RenderLightProbes {
                volume,
                max_per_step,
            } => match env.objects.get_mut::<CoreLightProbeVolume>(*volume) {
                Ok(core) => {
                    let done = core.render_probes(*max_per_step, &mut *env.backend);
                    if core.is_active() {
                        env.scene.notify_light_probe_volume_updated(*volume, true);
                    }
                    done
                }
                Err(e) => {
                    warn!(error = %e, "light probe task target gone");
                    true
                }
            },
            Self::FilterSkybox { skybox } => match env.objects.get_mut::<CoreSkybox>(*skybox) {
                Ok(core) => {
                    core.filter(&mut *env.backend);
                    true
                }
                Err(e) => {
                    warn!(error = %e, "skybox task target gone");
                    true
                }
            },
            Self::CaptureReflectionProbe { probe } => {
                match env.objects.get_mut::<CoreReflectionProbe>(*probe) {
                    Ok(core) => {
                        core.capture(&mut *env.backend);
                        true
                    }
                    Err(e) => {
                        warn!(error = %e, "reflection probe task target gone");
                        true
                    }
                }
            }
            Self::FilterReflectionProbe { probe } => {
                match env.objects.get_mut::<CoreReflectionProbe>(*probe) {
                    Ok(core) => {
                        core.filter(&mut *env.backend);
                        true
                    }
                    Err(e) => {
                        warn!(error = %e, "reflection probe task target gone");
                        true
                    }
                }
            }
            Self::Custom(work) => work(env),
        }
    }
}

type Callback = Box<dyn FnMut() + Send>;

/// Result of one processor visit to a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// A step ran and more are needed.
    Continue,
    /// A step ran and the task is now complete.
    Complete,
    /// The task is canceled or no longer running; nothing more to do.
    Stopped,
}

/// A deferred, cancelable, multi-frame unit of GPU work.
pub struct RendererTask {
    name: String,
    state: AtomicU8,
    work: Mutex<TaskWork>,
    on_complete: Mutex<Option<Callback>>,
    /// Set on completion, cleared by dispatch or by a cancel.
    dispatch_pending: AtomicBool,
    ready_at: AtomicU64,
    steps: AtomicU32,
}

impl fmt::Debug for RendererTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererTask")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("steps", &self.steps())
            .finish_non_exhaustive()
    }
}

impl RendererTask {
    /// Creates an idle task.
    #[must_use]
    pub fn new(name: impl Into<String>, work: TaskWork) -> TaskRef {
        Arc::new(Self {
            name: name.into(),
            state: AtomicU8::new(TaskState::Idle as u8),
            work: Mutex::new(work),
            on_complete: Mutex::new(None),
            dispatch_pending: AtomicBool::new(false),
            ready_at: AtomicU64::new(0),
            steps: AtomicU32::new(0),
        })
    }

    /// Creates an idle task around a step function.
    #[must_use]
    pub fn custom<F>(name: impl Into<String>, work: F) -> TaskRef
    where
        F: FnMut(&mut TaskEnv<'_>) -> bool + Send + 'static,
    {
        Self::new(name, TaskWork::Custom(Box::new(work)))
    }

    /// Task name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True once finished.
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state() == TaskState::Complete
    }

    /// True once canceled.
    #[inline]
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.state() == TaskState::Canceled
    }

    /// Number of steps run so far.
    #[must_use]
    pub fn steps(&self) -> u32 {
        self.steps.load(Ordering::Relaxed)
    }

    /// Sets the callback fired on the simulation side each time the task
    /// completes. Replaces any earlier callback.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        *self.on_complete.lock() = Some(Box::new(callback));
    }

    /// Requests cancellation. Returns `false` if the task had already
    /// completed and its callback was dispatched (the state is left as is).
    ///
    /// A running step is not interrupted; no further step starts once the
    /// processor sees the flag. A completion whose callback is still
    /// pending is withdrawn.
    pub fn cancel(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current == TaskState::Canceled as u8 {
                return true;
            }
            if current == TaskState::Complete as u8
                && !self.dispatch_pending.swap(false, Ordering::AcqRel)
            {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                TaskState::Canceled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    debug!(task = %self.name, "task canceled");
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    // =========================================================================
    // SCHEDULER/PROCESSOR SIDE
    // =========================================================================

    /// Resets for (re)queueing.
    ///
    /// # Panics
    ///
    /// If the task is running.
    pub(crate) fn reset_for_queue(&self, ready_at: u64) {
        self.ready_at.store(ready_at, Ordering::Release);
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            assert!(
                current != TaskState::Running as u8,
                "Task '{}' scheduled while running!",
                self.name
            );
            match self.state.compare_exchange_weak(
                current,
                TaskState::Idle as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.dispatch_pending.store(false, Ordering::Release);
    }

    /// Sync point after which the core side may start the task.
    pub(crate) fn ready_at(&self) -> u64 {
        self.ready_at.load(Ordering::Acquire)
    }

    /// Idle → Running. Fails for any other state.
    pub(crate) fn try_start(&self) -> bool {
        self.state
            .compare_exchange(
                TaskState::Idle as u8,
                TaskState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Runs one step if the task is running.
    pub(crate) fn run_step(
        &self,
        objects: &mut CoreObjectRegistry<CoreRenderer>,
        backend: &mut dyn RenderBackend,
        scene: &mut RendererScene,
    ) -> StepOutcome {
        if self.state() != TaskState::Running {
            return StepOutcome::Stopped;
        }

        let done = {
            let mut env = TaskEnv::new(objects, backend, scene, &self.state);
            self.work.lock().step(&mut env)
        };
        let steps = self.steps.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(task = %self.name, steps, done, "task step");

        if done {
            // Loses against a cancel that landed during the step.
            self.dispatch_pending.store(true, Ordering::Release);
            let completed = self
                .state
                .compare_exchange(
                    TaskState::Running as u8,
                    TaskState::Complete as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok();
            if completed {
                debug!(task = %self.name, steps, "task complete");
                return StepOutcome::Complete;
            }
            self.dispatch_pending.store(false, Ordering::Release);
            return StepOutcome::Stopped;
        }
        if self.state() == TaskState::Running {
            StepOutcome::Continue
        } else {
            StepOutcome::Stopped
        }
    }

    /// Claims a pending completion for dispatch. Exactly one of this and
    /// [`cancel`](Self::cancel) wins for each completion.
    pub(crate) fn claim_completion(&self) -> bool {
        self.dispatch_pending.swap(false, Ordering::AcqRel)
    }

    /// Runs the completion callback, if one is set. Returns `true` if it ran.
    ///
    /// The callback runs outside the lock, so it may replace itself or
    /// reschedule the task. It is kept for the next completion unless it
    /// installed a replacement.
    pub(crate) fn fire_callback(&self) -> bool {
        let Some(mut callback) = self.on_complete.lock().take() else {
            return false;
        };
        callback();
        let mut slot = self.on_complete.lock();
        if slot.is_none() {
            *slot = Some(callback);
        }
        true
    }
}
