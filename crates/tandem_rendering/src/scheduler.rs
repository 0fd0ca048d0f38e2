//! # Task Scheduling
//!
//! Two halves, one per context:
//!
//! - [`TaskScheduler`] is shared (`Arc`). The simulation side schedules
//!   tasks into it and polls it for completions once per frame.
//! - [`TaskProcessor`] lives inside the core renderer and drives running
//!   tasks one step per frame.
//!
//! ```text
//! sim frame N:  schedule(t)  ──► queued (ready after sync N)
//!               sync N published
//! core frame N: drain_ready(N) ──► active: Idle → Running
//!               step each active task once
//! sim frame N+k: poll_completions(): Complete → callback, untracked
//!                                    Canceled → untracked, no callback
//!                                    (also a completion canceled first)
//! ```
//!
//! A task only becomes ready after the sync that follows its scheduling,
//! so the packet that changed an object is always applied before a task
//! spawned for it runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tandem_core::CoreObjectRegistry;
use tracing::debug;

use crate::ibl::RenderBackend;
use crate::renderer::CoreRenderer;
use crate::scene::RendererScene;
use crate::task::{StepOutcome, TaskRef, TaskState};

#[derive(Default)]
struct Queues {
    /// Waiting for the core side to pick them up.
    queued: Vec<TaskRef>,
    /// Waiting for completion-callback dispatch.
    unresolved: Vec<TaskRef>,
}

fn contains(list: &[TaskRef], task: &TaskRef) -> bool {
    list.iter().any(|t| Arc::ptr_eq(t, task))
}

/// Scheduler counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// `schedule` calls.
    pub scheduled: u64,
    /// Completion callbacks fired.
    pub callbacks_fired: u64,
    /// Tasks completed (with or without a callback).
    pub completed: u64,
    /// Canceled tasks dropped from tracking.
    pub canceled: u64,
}

/// Shared task queue and completion tracker.
#[derive(Default)]
pub struct TaskScheduler {
    queues: Mutex<Queues>,
    published: AtomicU64,
    stats: Mutex<SchedulerStats>,
}

impl TaskScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a task for the core side and tracks it for completion.
    ///
    /// Re-queueing a completed or canceled task resets it to idle.
    ///
    /// # Panics
    ///
    /// If the task is currently running.
    pub fn schedule(&self, task: &TaskRef) {
        task.reset_for_queue(self.published.load(Ordering::Acquire) + 1);

        let mut queues = self.queues.lock();
        if !contains(&queues.queued, task) {
            queues.queued.push(Arc::clone(task));
        }
        if !contains(&queues.unresolved, task) {
            queues.unresolved.push(Arc::clone(task));
        }
        drop(queues);

        self.stats.lock().scheduled += 1;
        debug!(task = task.name(), "task scheduled");
    }

    /// Marks a sync point. Returns its number.
    pub fn publish_sync(&self) -> u64 {
        self.published.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Sync points published so far.
    #[must_use]
    pub fn published_syncs(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    /// Fires callbacks of completed tasks and stops tracking finished ones.
    ///
    /// Each completion fires the task's callback exactly once. A completion
    /// canceled before this poll claims it is dropped like any canceled
    /// task, without a callback. Returns the number of completions
    /// dispatched.
    pub fn poll_completions(&self) -> usize {
        let mut finished = Vec::new();
        let mut canceled = 0;
        self.queues.lock().unresolved.retain(|task| match task.state() {
            TaskState::Complete => {
                finished.push(Arc::clone(task));
                false
            }
            TaskState::Canceled => {
                canceled += 1;
                false
            }
            TaskState::Idle | TaskState::Running => true,
        });

        // Callbacks run without the lock, so they may schedule again.
        let mut completed = 0;
        let mut fired = 0;
        for task in &finished {
            if !task.claim_completion() {
                canceled += 1;
                continue;
            }
            completed += 1;
            if task.fire_callback() {
                fired += 1;
            }
        }

        let mut stats = self.stats.lock();
        stats.completed += completed as u64;
        stats.callbacks_fired += fired;
        stats.canceled += canceled;
        completed
    }

    /// Tasks awaiting completion dispatch.
    #[must_use]
    pub fn unresolved(&self) -> usize {
        self.queues.lock().unresolved.len()
    }

    /// Tasks not yet picked up by the core side.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queues.lock().queued.len()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        *self.stats.lock()
    }

    /// Removes and returns queued tasks that may start once sync `synced`
    /// has been applied. Tasks that are no longer idle are dropped.
    pub(crate) fn drain_ready(&self, synced: u64) -> Vec<TaskRef> {
        let mut queues = self.queues.lock();
        let mut ready = Vec::new();
        queues.queued.retain(|task| {
            if task.state() != TaskState::Idle {
                return false;
            }
            if task.ready_at() <= synced {
                ready.push(Arc::clone(task));
                return false;
            }
            true
        });
        ready
    }
}

/// Per-call processor counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdvanceReport {
    /// Tasks moved from the queue into the working set.
    pub started: u32,
    /// Steps executed.
    pub steps: u32,
    /// Tasks that reached `Complete`.
    pub completed: u32,
}

/// Core-side working set of running tasks.
#[derive(Default)]
pub struct TaskProcessor {
    active: Vec<TaskRef>,
}

impl TaskProcessor {
    /// Creates an empty processor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks in the working set.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.len()
    }

    /// Picks up ready tasks and runs one step of every running task.
    ///
    /// With `force_all`, repeats until the working set is empty.
    pub fn advance(
        &mut self,
        scheduler: &TaskScheduler,
        synced: u64,
        objects: &mut CoreObjectRegistry<CoreRenderer>,
        backend: &mut dyn RenderBackend,
        scene: &mut RendererScene,
        force_all: bool,
    ) -> AdvanceReport {
        let mut report = AdvanceReport::default();
        loop {
            for task in scheduler.drain_ready(synced) {
                if task.try_start() && !contains(&self.active, &task) {
                    report.started += 1;
                    self.active.push(task);
                }
            }

            self.active.retain(|task| match task.run_step(objects, &mut *backend, &mut *scene) {
                StepOutcome::Continue => {
                    report.steps += 1;
                    true
                }
                StepOutcome::Complete => {
                    report.steps += 1;
                    report.completed += 1;
                    false
                }
                StepOutcome::Stopped => false,
            });

            if !force_all || self.active.is_empty() {
                return report;
            }
        }
    }

    /// Drives a single task, outside the normal frame cadence.
    ///
    /// An idle task is started even if it is not yet ready. With
    /// `force_all`, steps until the task completes or is canceled;
    /// otherwise runs one step and keeps the task in the working set if it
    /// needs more.
    pub fn process_task(
        &mut self,
        task: &TaskRef,
        objects: &mut CoreObjectRegistry<CoreRenderer>,
        backend: &mut dyn RenderBackend,
        scene: &mut RendererScene,
        force_all: bool,
    ) -> AdvanceReport {
        let mut report = AdvanceReport::default();
        if task.try_start() {
            report.started += 1;
        }

        let finished = loop {
            match task.run_step(objects, &mut *backend, &mut *scene) {
                StepOutcome::Continue => {
                    report.steps += 1;
                    if !force_all {
                        break false;
                    }
                }
                StepOutcome::Complete => {
                    report.steps += 1;
                    report.completed += 1;
                    break true;
                }
                StepOutcome::Stopped => break true,
            }
        };

        if finished {
            self.active.retain(|t| !Arc::ptr_eq(t, task));
        } else if !contains(&self.active, task) {
            self.active.push(Arc::clone(task));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::task::RendererTask;
    use std::sync::atomic::{AtomicBool, AtomicU32};
    use tandem_core::context::{enter, ExecutionContext};

    fn countdown(name: &str, mut remaining: u32) -> TaskRef {
        RendererTask::custom(name, move |_| {
            if remaining == 0 {
                return true;
            }
            remaining -= 1;
            false
        })
    }

    struct Core {
        objects: CoreObjectRegistry<CoreRenderer>,
        backend: HeadlessBackend,
        scene: RendererScene,
        processor: TaskProcessor,
    }

    impl Core {
        fn new() -> Self {
            Self {
                objects: CoreObjectRegistry::new(),
                backend: HeadlessBackend::new(),
                scene: RendererScene::new(),
                processor: TaskProcessor::new(),
            }
        }

        fn advance(&mut self, scheduler: &TaskScheduler, force_all: bool) -> AdvanceReport {
            let synced = scheduler.published_syncs();
            self.processor.advance(
                scheduler,
                synced,
                &mut self.objects,
                &mut self.backend,
                &mut self.scene,
                force_all,
            )
        }
    }

    #[test]
    fn test_task_not_ready_before_next_sync() {
        let _ctx = enter(ExecutionContext::Core);
        let scheduler = TaskScheduler::new();
        let mut core = Core::new();
        let task = countdown("late", 0);

        scheduler.schedule(&task);
        assert_eq!(core.advance(&scheduler, false).started, 0);
        assert_eq!(task.state(), TaskState::Idle);

        scheduler.publish_sync();
        let report = core.advance(&scheduler, false);
        assert_eq!(report.started, 1);
        assert_eq!(report.completed, 1);
    }

    #[test]
    fn test_multi_frame_task_with_callback() {
        let _ctx = enter(ExecutionContext::Core);
        let scheduler = TaskScheduler::new();
        let mut core = Core::new();
        let fired = Arc::new(AtomicBool::new(false));
        let task = countdown("three-frames", 2);
        {
            let fired = Arc::clone(&fired);
            task.on_complete(move || fired.store(true, Ordering::SeqCst));
        }

        scheduler.schedule(&task);
        scheduler.publish_sync();
        for _ in 0..2 {
            core.advance(&scheduler, false);
            assert_eq!(task.state(), TaskState::Running);
            assert_eq!(scheduler.poll_completions(), 0);
        }
        core.advance(&scheduler, false);
        assert!(task.is_complete());
        assert!(!fired.load(Ordering::SeqCst), "callback waits for poll");

        assert_eq!(scheduler.poll_completions(), 1);
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(scheduler.unresolved(), 0);
        assert_eq!(scheduler.poll_completions(), 0);
        assert_eq!(scheduler.stats().callbacks_fired, 1);
    }

    #[test]
    fn test_force_all_drains_working_set() {
        let _ctx = enter(ExecutionContext::Core);
        let scheduler = TaskScheduler::new();
        let mut core = Core::new();
        let a = countdown("a", 5);
        let b = countdown("b", 1);
        scheduler.schedule(&a);
        scheduler.schedule(&b);
        scheduler.publish_sync();

        let report = core.advance(&scheduler, true);
        assert_eq!(report.completed, 2);
        assert!(a.is_complete() && b.is_complete());
        assert_eq!(core.processor.active(), 0);
    }

    #[test]
    fn test_canceled_task_is_dropped_silently() {
        let _ctx = enter(ExecutionContext::Core);
        let scheduler = TaskScheduler::new();
        let mut core = Core::new();
        let fired = Arc::new(AtomicBool::new(false));
        let task = countdown("doomed", 10);
        {
            let fired = Arc::clone(&fired);
            task.on_complete(move || fired.store(true, Ordering::SeqCst));
        }
        scheduler.schedule(&task);
        scheduler.publish_sync();
        core.advance(&scheduler, false);

        assert!(task.cancel());
        core.advance(&scheduler, false);
        assert_eq!(task.steps(), 1, "no step after cancel was observed");
        assert_eq!(core.processor.active(), 0);

        assert_eq!(scheduler.poll_completions(), 0);
        assert_eq!(scheduler.unresolved(), 0);
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(scheduler.stats().canceled, 1);
    }

    #[test]
    fn test_process_task_out_of_band() {
        let _ctx = enter(ExecutionContext::Core);
        let scheduler = TaskScheduler::new();
        let mut core = Core::new();
        let task = countdown("waited", 3);
        scheduler.schedule(&task);

        // Not yet ready, but a forced wait runs it anyway.
        let report = core.processor.process_task(
            &task,
            &mut core.objects,
            &mut core.backend,
            &mut core.scene,
            true,
        );
        assert_eq!(report.steps, 4);
        assert!(task.is_complete());

        // The stale queue entry is discarded, not re-run.
        scheduler.publish_sync();
        assert_eq!(core.advance(&scheduler, false).steps, 0);
        assert_eq!(scheduler.queued(), 0);
    }

    #[test]
    fn test_reschedule_after_complete_runs_again() {
        let _ctx = enter(ExecutionContext::Core);
        let scheduler = TaskScheduler::new();
        let mut core = Core::new();
        let task = countdown("twice", 0);
        let fired = Arc::new(AtomicU32::new(0));
        {
            let fired = Arc::clone(&fired);
            task.on_complete(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        scheduler.schedule(&task);
        scheduler.publish_sync();
        core.advance(&scheduler, false);
        assert!(task.is_complete());

        scheduler.schedule(&task);
        assert_eq!(task.state(), TaskState::Idle);
        assert_eq!(scheduler.unresolved(), 1, "tracked once");
        scheduler.publish_sync();
        core.advance(&scheduler, false);
        assert_eq!(task.steps(), 2);
        assert_eq!(scheduler.poll_completions(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        scheduler.schedule(&task);
        scheduler.publish_sync();
        core.advance(&scheduler, false);
        assert_eq!(scheduler.poll_completions(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 2, "callback fires per completion");
        assert_eq!(scheduler.stats().callbacks_fired, 2);
    }

    #[test]
    fn test_cancel_between_completion_and_poll_drops_callback() {
        let _ctx = enter(ExecutionContext::Core);
        let scheduler = TaskScheduler::new();
        let mut core = Core::new();
        let fired = Arc::new(AtomicBool::new(false));
        let task = countdown("late-cancel", 0);
        {
            let fired = Arc::clone(&fired);
            task.on_complete(move || fired.store(true, Ordering::SeqCst));
        }
        scheduler.schedule(&task);
        scheduler.publish_sync();
        assert_eq!(core.advance(&scheduler, false).completed, 1);
        assert!(task.is_complete());

        assert!(task.cancel(), "completion not yet dispatched");
        assert!(task.is_canceled());
        assert_eq!(scheduler.poll_completions(), 0);
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(scheduler.unresolved(), 0);
        let stats = scheduler.stats();
        assert_eq!(stats.canceled, 1);
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.callbacks_fired, 0);
    }

    #[test]
    fn test_cancel_after_poll_leaves_task_complete() {
        let _ctx = enter(ExecutionContext::Core);
        let scheduler = TaskScheduler::new();
        let mut core = Core::new();
        let task = countdown("settled", 0);
        scheduler.schedule(&task);
        scheduler.publish_sync();
        core.advance(&scheduler, false);
        assert_eq!(scheduler.poll_completions(), 1);

        assert!(!task.cancel());
        assert!(task.is_complete());
        assert_eq!(scheduler.stats().canceled, 0);
    }
}
