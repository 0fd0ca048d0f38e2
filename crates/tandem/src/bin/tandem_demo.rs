//! # TANDEM Demo
//!
//! Headless run of a probe-lit scene through the lockstep frame loop.
//!
//! ```bash
//! # Defaults: headless backend, 60 FPS, 240 frames
//! RUST_LOG=info ./tandem_demo
//!
//! # Custom configuration and frame count
//! RUST_LOG=tandem=debug ./tandem_demo tandem.toml 600
//! ```

use std::process::ExitCode;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tandem::core::Handle;
use tandem::rendering::{LightProbeVolume, ReflectionProbe, RenderWorld, Skybox, TextureDesc};
use tandem::shared::{Aabb, Vec3};
use tandem::{FrameContext, FrameHooks, FrameLoop, FrameLoopConfig, TandemResult};
use tracing::{error, info};

const DEFAULT_FRAMES: u64 = 240;
/// Frames between coefficient readbacks.
const READBACK_INTERVAL: u64 = 60;

struct Args {
    config: Option<String>,
    frames: u64,
}

fn parse_args() -> Args {
    let mut args = Args {
        config: None,
        frames: DEFAULT_FRAMES,
    };
    for arg in std::env::args().skip(1) {
        match arg.parse::<u64>() {
            Ok(frames) => args.frames = frames,
            Err(_) => args.config = Some(arg),
        }
    }
    args
}

/// Object placement for one point in time.
#[derive(Clone, Copy)]
struct Motion {
    orbit: Vec3,
    drift: Vec3,
}

impl Motion {
    fn at(elapsed: f32) -> Self {
        Self {
            orbit: Vec3::new(4.0 * elapsed.cos(), 2.0, 4.0 * elapsed.sin()),
            drift: Vec3::new(elapsed.sin(), 1.0, 0.0),
        }
    }
}

/// A probe grid under a skybox, with one reflection probe orbiting the
/// center and a probe that keeps moving.
///
/// Motion for the next frame is computed on the worker pool, so it
/// overlaps the handshake.
struct DemoScene {
    probes_per_step: u32,
    volume: Option<Handle>,
    reflection: Option<Handle>,
    moving_probe: u32,
    elapsed: f32,
    motion_tx: Sender<Motion>,
    motion_rx: Receiver<Motion>,
}

impl DemoScene {
    fn build(&mut self, world: &mut RenderWorld) -> TandemResult<()> {
        let sky = world.create_texture(TextureDesc::cubemap(128, 1), Some([0.4, 0.6, 0.9]))?;
        let skybox = world.create(Skybox::new());
        world.with_object(skybox, |s: &mut Skybox, sched| s.set_texture(Some(sky), sched))?;

        let grid = LightProbeVolume::from_grid(
            Aabb::new(Vec3::new(-8.0, 0.0, -8.0), Vec3::new(8.0, 4.0, 8.0)),
            [4, 2, 4],
        )
        .with_probes_per_step(self.probes_per_step);
        let volume = world.create(grid);
        self.moving_probe = world
            .with_object(volume, |v: &mut LightProbeVolume, _| v.add_probe(Vec3::ZERO))?;
        world.with_object(volume, |v: &mut LightProbeVolume, sched| v.render_probes(sched))?;
        let probes = world.get::<LightProbeVolume>(volume)?.probe_count();
        self.volume = Some(volume);

        let reflection = world.create(ReflectionProbe::new(Vec3::new(0.0, 2.0, 0.0), 6.0));
        world.with_object(reflection, |p: &mut ReflectionProbe, sched| {
            p.ensure_filtered(sched)
        })?;
        self.reflection = Some(reflection);

        info!(probes, "demo scene built");
        Ok(())
    }
}

impl FrameHooks for DemoScene {
    fn pre_update(&mut self, world: &mut RenderWorld, ctx: &FrameContext<'_>) -> TandemResult<()> {
        if ctx.frame == 0 {
            self.build(world)?;
        }
        Ok(())
    }

    fn update(&mut self, world: &mut RenderWorld, ctx: &FrameContext<'_>) -> TandemResult<()> {
        self.elapsed += ctx.delta_time;
        let (Some(volume), Some(reflection)) = (self.volume, self.reflection) else {
            return Ok(());
        };

        let elapsed = self.elapsed;
        let tx = self.motion_tx.clone();
        ctx.workers.spawn(move || {
            let _ = tx.send(Motion::at(elapsed));
        })?;

        // Latest finished result; a frame without one keeps last positions.
        let Some(motion) = self.motion_rx.try_iter().last() else {
            return Ok(());
        };
        world.with_object(reflection, |p: &mut ReflectionProbe, _| {
            p.set_position(motion.orbit);
        })?;

        let id = self.moving_probe;
        world.with_object(volume, |v: &mut LightProbeVolume, sched| {
            v.set_probe_position(id, motion.drift);
            v.render_probe(id, sched)
        })?;
        Ok(())
    }

    fn post_update(&mut self, world: &mut RenderWorld, ctx: &FrameContext<'_>) -> TandemResult<()> {
        let Some(reflection) = self.reflection else {
            return Ok(());
        };
        if ctx.frame % READBACK_INTERVAL == READBACK_INTERVAL - 1 {
            world.with_object(reflection, |p: &mut ReflectionProbe, sched| {
                p.ensure_filtered(sched)
            })?;
            if let Some(volume) = self.volume {
                let updated = world.update_probe_coefficients(volume)?;
                info!(frame = ctx.frame, updated, "probe coefficients read back");
            }
        }
        Ok(())
    }
}

fn run(args: &Args) -> TandemResult<()> {
    let config = match &args.config {
        Some(path) => FrameLoopConfig::load(path)?,
        None => FrameLoopConfig::default(),
    };
    let (motion_tx, motion_rx) = unbounded();
    let scene = DemoScene {
        probes_per_step: config.probes_per_step,
        volume: None,
        reflection: None,
        moving_probe: 0,
        elapsed: 0.0,
        motion_tx,
        motion_rx,
    };

    let mut frame_loop = FrameLoop::new(config, scene)?;
    frame_loop.run(args.frames)?;
    let stats = frame_loop.shutdown()?;
    info!(
        frames = stats.frames_recorded,
        fps = format_args!("{:.1}", stats.avg_fps()),
        "demo finished"
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "demo failed");
            ExitCode::FAILURE
        }
    }
}
