//! Cross-crate scenarios: probe compaction on the core side and the task
//! lifecycle across lockstep frames.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tandem::core::context::{enter, ExecutionContext};
use tandem::core::{CoreObjectRegistry, FrameAlloc, Handle, SimObjectRegistry};
use tandem::rendering::{
    CoreLightProbeVolume, CoreRenderer, HeadlessBackend, LightProbeVolume, ProbeState,
    RenderWorld, RendererTask, TaskScheduler, TaskState, DEFAULT_FRAME_ALLOC_BYTES,
};
use tandem::shared::{Vec3, MIN_PROBE_COUNT};

// =============================================================================
// PROBE COMPACTION
// =============================================================================

struct Pair {
    sim: SimObjectRegistry<CoreRenderer>,
    core: CoreObjectRegistry<CoreRenderer>,
    renderer: CoreRenderer,
    handle: Handle,
}

impl Pair {
    fn new(volume: LightProbeVolume) -> Self {
        let mut renderer = CoreRenderer::new(
            Box::new(HeadlessBackend::new()),
            Arc::new(TaskScheduler::new()),
        );
        let mut sim: SimObjectRegistry<CoreRenderer> = SimObjectRegistry::new();
        let mut core = CoreObjectRegistry::new();
        let (handle, half) = sim.register(Box::new(volume));
        core.create(handle, half, &mut renderer);
        let mut pair = Self {
            sim,
            core,
            renderer,
            handle,
        };
        pair.apply();
        pair
    }

    fn apply(&mut self) -> usize {
        let batch = self.sim.sync_to_core(FrameAlloc::new(64 * 1024)).unwrap();
        self.core.apply_batch(&batch, &mut self.renderer).unwrap();
        batch.entries.len()
    }

    fn sim(&mut self) -> &mut LightProbeVolume {
        self.sim.get_mut(self.handle).unwrap()
    }

    fn core(&self) -> &CoreLightProbeVolume {
        self.core.get(self.handle).unwrap()
    }
}

fn probes(count: u32) -> LightProbeVolume {
    let mut volume = LightProbeVolume::new();
    for i in 0..count {
        volume.add_probe(Vec3::new(i as f32, 0.0, 0.0));
    }
    volume
}

#[test]
fn scenario_a_remove_middle_probe() {
    let _ctx = enter(ExecutionContext::Core);
    let mut pair = Pair::new(probes(5));
    assert_eq!(pair.core().active_ids(), vec![0, 1, 2, 3, 4]);

    assert!(pair.sim().remove_probe(2));
    pair.apply();

    let core = pair.core();
    assert_eq!(core.active_count(), 4);
    assert!(core.is_compact());
    // The last active record moved into the hole.
    assert_eq!(core.active_ids(), vec![0, 1, 4, 3]);
    assert_eq!(core.index_of(4), Some(2));
    assert_eq!(core.index_of(2), None);
    assert_eq!(core.state_at(4), Some(ProbeState::Empty));
}

#[test]
fn compaction_holds_under_mixed_edits() {
    let _ctx = enter(ExecutionContext::Core);
    let mut pair = Pair::new(probes(8));

    // Deterministic add/remove/move sequence.
    let mut seed = 0x2545_f491_u32;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        seed
    };

    for round in 0..200 {
        let live: Vec<u32> = pair.sim().probe_ids().collect();
        match next() % 3 {
            0 => {
                pair.sim().add_probe(Vec3::new(round as f32, 1.0, 0.0));
            }
            1 => {
                let id = live[next() as usize % live.len()];
                let removed = pair.sim().remove_probe(id);
                assert_eq!(removed, live.len() > MIN_PROBE_COUNT);
            }
            _ => {
                let id = live[next() as usize % live.len()];
                pair.sim().set_probe_position(id, Vec3::new(0.0, round as f32, 0.0));
            }
        }
        pair.apply();

        let sim_count = pair.sim().probe_count();
        let core = pair.core();
        assert!(core.is_compact(), "gap after round {round}");
        assert_eq!(core.active_count(), sim_count);
        assert!(sim_count >= MIN_PROBE_COUNT);
    }
}

#[test]
fn floor_guard_keeps_minimum() {
    let _ctx = enter(ExecutionContext::Core);
    let mut pair = Pair::new(probes(MIN_PROBE_COUNT as u32 + 1));

    assert!(pair.sim().remove_probe(0));
    for id in 1..=MIN_PROBE_COUNT as u32 {
        assert!(!pair.sim().remove_probe(id));
    }
    pair.apply();
    assert_eq!(pair.core().active_count(), MIN_PROBE_COUNT);
}

#[test]
fn clean_objects_send_no_packets() {
    let _ctx = enter(ExecutionContext::Core);
    let mut pair = Pair::new(probes(5));
    assert_eq!(pair.apply(), 0);

    pair.sim().set_probe_position(1, Vec3::ONE);
    assert_eq!(pair.apply(), 1);
    assert_eq!(pair.apply(), 0);
    assert_eq!(pair.core().probe_position(1), Some(Vec3::ONE));
}

// =============================================================================
// TASK LIFECYCLE
// =============================================================================

fn world() -> RenderWorld {
    RenderWorld::new(Box::new(HeadlessBackend::new()), DEFAULT_FRAME_ALLOC_BYTES).unwrap()
}

/// One lockstep frame, waiting for the core side to finish it.
fn frame(world: &mut RenderWorld) -> usize {
    let completed = world.poll_completions();
    world.sync_to_core().unwrap();
    world.queue_render_frame();
    world.submit(true).unwrap();
    completed
}

/// A task that needs `steps` steps per run, plus a counter of callback
/// firings.
fn counted_task(steps: u32) -> (tandem::rendering::TaskRef, Arc<AtomicU32>) {
    let mut taken = 0;
    let task = RendererTask::custom("counted", move |_| {
        taken += 1;
        if taken < steps {
            return false;
        }
        taken = 0;
        true
    });
    let fired = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&fired);
    task.on_complete(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (task, fired)
}

#[test]
fn scenario_b_callback_after_final_step() {
    let mut world = world();
    let (task, fired) = counted_task(4);
    world.scheduler().schedule(&task);
    assert_eq!(task.state(), TaskState::Idle);

    let mut states = Vec::new();
    for _ in 0..4 {
        frame(&mut world);
        states.push(task.state());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
    assert_eq!(
        states,
        vec![
            TaskState::Running,
            TaskState::Running,
            TaskState::Running,
            TaskState::Complete
        ]
    );
    assert_eq!(task.steps(), 4);

    // Frame 5's poll dispatches the callback, once.
    assert_eq!(frame(&mut world), 1);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(frame(&mut world), 0);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(world.scheduler().unresolved(), 0);
    world.shutdown().unwrap();
}

#[test]
fn scenario_c_cancel_between_advance_and_poll() {
    let mut world = world();
    let (task, fired) = counted_task(4);
    world.scheduler().schedule(&task);

    frame(&mut world);
    assert_eq!(task.state(), TaskState::Running);
    assert!(task.cancel());

    assert_eq!(frame(&mut world), 0);
    frame(&mut world);
    assert_eq!(task.state(), TaskState::Canceled);
    assert_eq!(task.steps(), 1, "no step after the cancel was seen");
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(world.scheduler().unresolved(), 0);
    assert_eq!(world.scheduler().stats().canceled, 1);
    world.shutdown().unwrap();
}

#[test]
fn task_waits_for_the_sync_that_follows_it() {
    let mut world = world();
    let (task, _) = counted_task(1);

    // A core frame without a sync point after the schedule.
    world.scheduler().schedule(&task);
    world.queue_render_frame();
    world.submit(true).unwrap();
    assert_eq!(task.state(), TaskState::Idle);

    frame(&mut world);
    assert!(task.is_complete());
    world.shutdown().unwrap();
}

#[test]
fn rescheduling_completed_task_runs_it_again() {
    let mut world = world();
    let (task, fired) = counted_task(1);
    world.scheduler().schedule(&task);
    frame(&mut world);
    frame(&mut world);
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // The callback stays registered across runs.
    world.scheduler().schedule(&task);
    assert_eq!(task.state(), TaskState::Idle);
    frame(&mut world);
    assert!(task.is_complete());
    assert_eq!(frame(&mut world), 1);
    assert_eq!(fired.load(Ordering::SeqCst), 2);
    assert_eq!(task.steps(), 2);
    world.shutdown().unwrap();
}

#[test]
fn scenario_c_cancel_after_core_completion() {
    let mut world = world();
    let (task, fired) = counted_task(1);
    world.scheduler().schedule(&task);

    // The core finishes the task; the callback has not been dispatched.
    world.sync_to_core().unwrap();
    world.queue_render_frame();
    world.submit(true).unwrap();
    assert!(task.is_complete());

    assert!(task.cancel());
    assert_eq!(task.state(), TaskState::Canceled);
    assert_eq!(world.poll_completions(), 0);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(world.scheduler().unresolved(), 0);
    assert_eq!(world.scheduler().stats().canceled, 1);
    world.shutdown().unwrap();
}

#[test]
#[should_panic(expected = "scheduled while running")]
fn scheduling_running_task_panics() {
    let mut world = world();
    let (task, _) = counted_task(3);
    world.scheduler().schedule(&task);
    frame(&mut world);
    assert_eq!(task.state(), TaskState::Running);
    world.scheduler().schedule(&task);
}

#[test]
fn wait_drives_task_out_of_band() {
    let mut world = world();
    let (task, fired) = counted_task(10);
    world.scheduler().schedule(&task);

    world.wait(&task).unwrap();
    assert!(task.is_complete());
    assert_eq!(task.steps(), 10);
    assert_eq!(world.poll_completions(), 1);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    world.shutdown().unwrap();
}
