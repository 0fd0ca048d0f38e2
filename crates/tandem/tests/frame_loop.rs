//! The lockstep frame loop running against a real core thread.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tandem::core::{
    CoreError, CoreLink, CoreObject, CoreResult, Handle, SimObject, SyncPacketReader,
    SyncPacketWriter,
};
use tandem::rendering::{
    CoreRenderer, FrameInfo, LightProbeVolume, RenderLocation, RenderWorld, RendererExtension,
    RendererTask,
};
use tandem::shared::{Aabb, Vec3};
use tandem::{FrameContext, FrameHooks, FrameLoop, FrameLoopConfig, TandemError, TandemResult};

fn unpaced() -> FrameLoopConfig {
    FrameLoopConfig {
        fps_limit: 0,
        handshake_poll_ms: 5,
        ..Default::default()
    }
}

/// Records every core frame number.
struct FrameRecorder(Arc<Mutex<Vec<u64>>>);

impl RendererExtension for FrameRecorder {
    fn location(&self) -> RenderLocation {
        RenderLocation::Prepare
    }

    fn name(&self) -> &str {
        "frame-recorder"
    }

    fn render(&mut self, frame: &FrameInfo) {
        self.0.lock().push(frame.frame);
    }
}

/// Checks at each frame start how far the core side got.
#[derive(Default)]
struct LatencyRecorder {
    core_frames: Arc<Mutex<Vec<u64>>>,
    observed: Vec<(u64, usize)>,
}

impl FrameHooks for LatencyRecorder {
    fn pre_update(&mut self, world: &mut RenderWorld, ctx: &FrameContext<'_>) -> TandemResult<()> {
        if ctx.frame == 0 {
            world.add_extension(Box::new(FrameRecorder(Arc::clone(&self.core_frames))));
        }
        self.observed.push((ctx.frame, self.core_frames.lock().len()));
        Ok(())
    }
}

#[test]
fn core_trails_simulation_by_at_most_one_frame() {
    let mut frame_loop = FrameLoop::new(unpaced(), LatencyRecorder::default()).unwrap();
    frame_loop.run(30).unwrap();

    for &(frame, done) in &frame_loop.hooks().observed {
        let frame = frame as usize;
        // Frame N waited for core frame N-1, so frame N+1 starts with at
        // least N core frames behind it.
        assert!(done + 1 >= frame, "frame {frame} saw only {done} core frames");
        assert!(done <= frame, "core ran ahead at frame {frame}");
    }

    let core_frames = Arc::clone(&frame_loop.hooks().core_frames);
    frame_loop.shutdown().unwrap();
    let recorded = core_frames.lock();
    assert_eq!(recorded.len(), 30);
    assert!(recorded.windows(2).all(|w| w[1] == w[0] + 1));
}

/// Schedules a multi-step task on frame 0 and counts its callback.
#[derive(Default)]
struct TaskIssuer {
    fired: Arc<AtomicU32>,
    fired_at: Option<u64>,
}

impl FrameHooks for TaskIssuer {
    fn pre_update(&mut self, world: &mut RenderWorld, ctx: &FrameContext<'_>) -> TandemResult<()> {
        if ctx.frame == 0 {
            let mut left = 3;
            let task = RendererTask::custom("three-steps", move |_| {
                left -= 1;
                left == 0
            });
            let fired = Arc::clone(&self.fired);
            task.on_complete(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
            world.scheduler().schedule(&task);
        }
        if self.fired_at.is_none() && self.fired.load(Ordering::SeqCst) > 0 {
            self.fired_at = Some(ctx.frame);
        }
        Ok(())
    }
}

#[test]
fn completion_callbacks_reach_hooks() {
    let mut frame_loop = FrameLoop::new(unpaced(), TaskIssuer::default()).unwrap();
    frame_loop.run(10).unwrap();

    let hooks = frame_loop.hooks();
    assert_eq!(hooks.fired.load(Ordering::SeqCst), 1);
    // Three core frames of work, seen no earlier than sim frame 3.
    let fired_at = hooks.fired_at.unwrap();
    assert!((3..=5).contains(&fired_at), "fired at frame {fired_at}");

    let stats = frame_loop.shutdown().unwrap();
    assert_eq!(stats.tasks_completed, 1);
    assert_eq!(stats.frames_recorded, 10);
}

/// Spawns one worker job per frame and records which thread ran it.
#[derive(Default)]
struct JobSpawner {
    ran_on: Arc<Mutex<Vec<String>>>,
    jobs: Vec<tandem::core::JobHandle>,
}

impl FrameHooks for JobSpawner {
    fn update(&mut self, _world: &mut RenderWorld, ctx: &FrameContext<'_>) -> TandemResult<()> {
        let ran_on = Arc::clone(&self.ran_on);
        let job = ctx.workers.spawn(move || {
            let name = std::thread::current().name().unwrap_or_default().to_owned();
            ran_on.lock().push(name);
        })?;
        self.jobs.push(job);
        Ok(())
    }
}

#[test]
fn hook_jobs_run_on_lent_worker() {
    // One thread whose slot is parked outside the handshake.
    let config = FrameLoopConfig {
        worker_threads: 1,
        ..unpaced()
    };
    let mut frame_loop = FrameLoop::new(config, JobSpawner::default()).unwrap();
    frame_loop.run(12).unwrap();
    assert_eq!(frame_loop.workers().limit(), 0);

    // Jobs still queued after the last handshake need a slot to drain.
    frame_loop.workers().add_worker().unwrap();
    for job in &frame_loop.hooks().jobs {
        job.wait();
    }
    frame_loop.workers().remove_worker();

    let ran_on = frame_loop.hooks().ran_on.lock().clone();
    assert_eq!(ran_on.len(), 12);
    assert!(ran_on.iter().all(|name| name.starts_with("worker-")));
    assert_eq!(frame_loop.workers().stats().jobs_completed, 12);
    frame_loop.shutdown().unwrap();
}

/// An object whose core half rejects every packet.
struct Corrupt {
    link: CoreLink,
}

struct CoreCorrupt;

impl SimObject<CoreRenderer> for Corrupt {
    fn link(&self) -> &CoreLink {
        &self.link
    }

    fn link_mut(&mut self) -> &mut CoreLink {
        &mut self.link
    }

    fn create_core(&self) -> Box<dyn CoreObject<CoreRenderer>> {
        Box::new(CoreCorrupt)
    }

    fn sync_size(&self, _dirty: u32) -> usize {
        1
    }

    fn write_sync(&mut self, _dirty: u32, writer: &mut SyncPacketWriter<'_>) {
        writer.write_bool(true);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl CoreObject<CoreRenderer> for CoreCorrupt {
    fn apply_sync(
        &mut self,
        _handle: Handle,
        _dirty: u32,
        reader: &mut SyncPacketReader<'_>,
        _ctx: &mut CoreRenderer,
    ) -> CoreResult<()> {
        let _ = reader.read_bool()?;
        Err(CoreError::InvalidEnum {
            field: "corrupt",
            value: 0xff,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct CorruptAt(u64);

impl FrameHooks for CorruptAt {
    fn update(&mut self, world: &mut RenderWorld, ctx: &FrameContext<'_>) -> TandemResult<()> {
        if ctx.frame == self.0 {
            world.create(Corrupt {
                link: CoreLink::new(),
            });
        }
        Ok(())
    }
}

#[test]
fn core_failure_halts_the_loop() {
    let mut frame_loop = FrameLoop::new(unpaced(), CorruptAt(3)).unwrap();
    let result = frame_loop.run(20);

    assert!(matches!(
        result,
        Err(TandemError::Core(CoreError::InvalidEnum { field: "corrupt", .. }))
    ));
    assert!(frame_loop.is_halted());
    // Surfaces in the frame that sent the packet or in the next one.
    assert!((3..=4).contains(&frame_loop.frame_count()));
    assert!(matches!(frame_loop.run_frame(), Err(TandemError::Halted)));
    assert!(frame_loop.shutdown().is_err());
}

#[test]
fn unknown_backend_aborts_startup() {
    let config = FrameLoopConfig::from_toml_str("backend = \"gl\"").unwrap();
    assert!(matches!(
        FrameLoop::new(config, ()),
        Err(TandemError::BackendUnavailable(name)) if name == "gl"
    ));
}

#[test]
fn paced_loop_holds_frame_budget() {
    let config = FrameLoopConfig::from_toml_str(
        r#"
        fps_limit = 200
        spin_threshold_us = 1000
        "#,
    )
    .unwrap();
    let mut frame_loop = FrameLoop::new(config, ()).unwrap();
    frame_loop.run(10).unwrap();

    let stats = frame_loop.shutdown().unwrap();
    // 5 ms per frame at 200 FPS.
    assert!(stats.avg_frame_ms() >= 4.5, "avg {} ms", stats.avg_frame_ms());
}

/// Captures a probe grid and reads the coefficients back once done.
struct ProbeCapture {
    volume: Option<Handle>,
    done: Arc<AtomicBool>,
    updated: usize,
}

impl FrameHooks for ProbeCapture {
    fn pre_update(&mut self, world: &mut RenderWorld, ctx: &FrameContext<'_>) -> TandemResult<()> {
        if ctx.frame == 0 {
            let grid = LightProbeVolume::from_grid(Aabb::new(Vec3::ZERO, Vec3::ONE), [2, 1, 1])
                .with_probes_per_step(2);
            let volume = world.create(grid);
            let task =
                world.with_object(volume, |v: &mut LightProbeVolume, s| v.render_probes(s))?;
            let done = Arc::clone(&self.done);
            task.on_complete(move || done.store(true, Ordering::SeqCst));
            self.volume = Some(volume);
        }
        Ok(())
    }

    fn post_update(&mut self, world: &mut RenderWorld, _ctx: &FrameContext<'_>) -> TandemResult<()> {
        if let Some(volume) = self.volume {
            if self.done.load(Ordering::SeqCst) && self.updated == 0 {
                self.updated = world.update_probe_coefficients(volume)?;
            }
        }
        Ok(())
    }
}

#[test]
fn probe_capture_spans_frames() {
    let hooks = ProbeCapture {
        volume: None,
        done: Arc::new(AtomicBool::new(false)),
        updated: 0,
    };
    let mut frame_loop = FrameLoop::new(unpaced(), hooks).unwrap();
    frame_loop.run(12).unwrap();

    // 3 x 2 x 2 corners, two per core frame.
    assert_eq!(frame_loop.hooks().updated, 12);
    let volume = frame_loop.hooks().volume.unwrap();
    let world = frame_loop.world();
    let sim = world.get::<LightProbeVolume>(volume).unwrap();
    assert!(sim
        .probe_ids()
        .all(|id| sim.probe_coefficients(id).is_some_and(|c| c != Default::default())));
    frame_loop.shutdown().unwrap();
}
