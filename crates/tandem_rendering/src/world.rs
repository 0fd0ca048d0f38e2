//! # Render World
//!
//! The simulation side's entry point. Owns the simulation halves, the
//! shared task scheduler and the handle to the core thread.
//!
//! ```text
//! create(obj)      register sim half   ──► queue Create(core half)
//! mutate via get_mut / with_object         (marks dirty bits)
//! sync_to_core()   build packets       ──► queue Sync(batch), SyncPoint(n)
//! queue_render_frame()                 ──► queue RenderFrame
//! submit(wait)     send the batch of queued commands
//! ```
//!
//! Nothing reaches the core thread until a submit. Handles returned by
//! [`RenderWorld::create`] are the only link between the halves.

use std::sync::Arc;

use crossbeam_channel::bounded;
use tandem_core::{
    CoreCommand, CoreError, CoreResult, CoreThread, Fence, Handle, SimObject, SimObjectRegistry,
};
use tandem_shared::ShCoefficients;
use tracing::{debug, info};

use crate::extensions::{ExtensionId, RendererExtension};
use crate::ibl::RenderBackend;
use crate::light_probe::LightProbeVolume;
use crate::renderer::{CoreRenderer, RenderCommand, RendererStats};
use crate::resources::{TextureDesc, TextureHandle};
use crate::scheduler::TaskScheduler;
use crate::task::TaskRef;

/// Default transient allocator size for one frame's sync packets.
pub const DEFAULT_FRAME_ALLOC_BYTES: usize = 64 * 1024;

/// Simulation-side renderer state.
pub struct RenderWorld {
    objects: SimObjectRegistry<CoreRenderer>,
    core: CoreThread<CoreRenderer>,
    scheduler: Arc<TaskScheduler>,
    frame_alloc_bytes: usize,
    next_extension: u64,
}

impl RenderWorld {
    /// Starts the core thread around `backend`.
    ///
    /// # Errors
    ///
    /// [`CoreError::ThreadSpawn`] if the core thread cannot start.
    pub fn new(backend: Box<dyn RenderBackend>, frame_alloc_bytes: usize) -> CoreResult<Self> {
        let scheduler = Arc::new(TaskScheduler::new());
        info!(backend = backend.name(), "render world starting");
        let core = CoreThread::spawn(CoreRenderer::new(backend, Arc::clone(&scheduler)))?;
        Ok(Self {
            objects: SimObjectRegistry::new(),
            core,
            scheduler,
            frame_alloc_bytes,
            next_extension: 0,
        })
    }

    /// The shared task scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    /// Number of registered objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    // =========================================================================
    // OBJECTS
    // =========================================================================

    /// Registers a simulation half and queues creation of its core half.
    pub fn create<T>(&mut self, object: T) -> Handle
    where
        T: SimObject<CoreRenderer>,
    {
        let (handle, core) = self.objects.register(Box::new(object));
        self.core.queue(CoreCommand::Create {
            handle,
            object: core,
        });
        handle
    }

    /// Unregisters an object and queues destruction of its core half.
    /// Returns `false` for unknown handles.
    pub fn destroy(&mut self, handle: Handle) -> bool {
        if self.objects.unregister(handle).is_none() {
            return false;
        }
        self.core.queue(CoreCommand::Destroy(handle));
        true
    }

    /// A simulation half.
    ///
    /// # Errors
    ///
    /// Unknown handle or wrong type.
    pub fn get<T: 'static>(&self, handle: Handle) -> CoreResult<&T> {
        self.objects.get(handle)
    }

    /// A simulation half, mutably.
    ///
    /// # Errors
    ///
    /// Unknown handle or wrong type.
    pub fn get_mut<T: 'static>(&mut self, handle: Handle) -> CoreResult<&mut T> {
        self.objects.get_mut(handle)
    }

    /// Runs `f` on a simulation half with the scheduler at hand, for
    /// operations that start tasks.
    ///
    /// # Errors
    ///
    /// Unknown handle or wrong type.
    pub fn with_object<T, R>(
        &mut self,
        handle: Handle,
        f: impl FnOnce(&mut T, &TaskScheduler) -> R,
    ) -> CoreResult<R>
    where
        T: 'static,
    {
        let object = self.objects.get_mut::<T>(handle)?;
        Ok(f(object, &self.scheduler))
    }

    // =========================================================================
    // FRAME PROTOCOL
    // =========================================================================

    /// Builds sync packets for every dirty object and queues them, followed
    /// by a sync point. Returns the packet bytes.
    ///
    /// # Errors
    ///
    /// Transient allocator misuse while building packets.
    pub fn sync_to_core(&mut self) -> CoreResult<usize> {
        let alloc = self.core.take_alloc(self.frame_alloc_bytes);
        let batch = self.objects.sync_to_core(alloc)?;
        let bytes = batch.byte_size();
        let packets = batch.entries.len();
        if !batch.is_empty() {
            self.core.queue(CoreCommand::Sync(batch));
        }

        let point = self.scheduler.publish_sync();
        self.core
            .queue(CoreCommand::Dispatch(RenderCommand::SyncPoint(point)));
        debug!(point, packets, bytes, "sync queued");
        Ok(bytes)
    }

    /// Fires completion callbacks of finished tasks. Returns how many fired.
    pub fn poll_completions(&self) -> usize {
        self.scheduler.poll_completions()
    }

    /// Queues one core frame.
    pub fn queue_render_frame(&mut self) {
        self.core
            .queue(CoreCommand::Dispatch(RenderCommand::RenderFrame));
    }

    /// Sends queued commands; with `wait`, blocks until they ran.
    ///
    /// # Errors
    ///
    /// A core thread failure.
    pub fn submit(&mut self, wait: bool) -> CoreResult<()> {
        self.core.submit(wait)
    }

    /// Sends queued commands followed by a fence, without blocking.
    ///
    /// # Errors
    ///
    /// A core thread failure.
    pub fn submit_with_fence(&mut self) -> CoreResult<Arc<Fence>> {
        let fence = Arc::new(Fence::new());
        self.core.queue(CoreCommand::Signal(Arc::clone(&fence)));
        self.core.submit(false)?;
        Ok(fence)
    }

    /// Blocks until `fence` signals.
    ///
    /// # Errors
    ///
    /// A core thread failure, including one that happened before the fence.
    pub fn wait_fence(&self, fence: &Fence) -> CoreResult<()> {
        self.core.wait_fence(fence)?;
        self.core.check_fatal()
    }

    /// Fails if the core thread stopped or recorded an error.
    ///
    /// # Errors
    ///
    /// The first core thread failure, or [`CoreError::CoreThreadGone`].
    pub fn check_core(&self) -> CoreResult<()> {
        self.core.check_fatal()
    }

    /// Completes `task` now: syncs pending state, then drives the task to
    /// the end on the core thread and waits for it.
    ///
    /// # Errors
    ///
    /// A core thread failure.
    pub fn wait(&mut self, task: &TaskRef) -> CoreResult<()> {
        self.sync_to_core()?;
        self.core
            .queue(CoreCommand::Dispatch(RenderCommand::ProcessTask {
                task: Arc::clone(task),
                force: true,
            }));
        self.core.submit(true)
    }

    // =========================================================================
    // LIGHT PROBES
    // =========================================================================

    /// Reads a volume's coefficients from the core side.
    ///
    /// # Errors
    ///
    /// A core thread failure.
    pub fn read_probe_coefficients(
        &mut self,
        volume: Handle,
    ) -> CoreResult<Vec<(u32, ShCoefficients)>> {
        let (reply, response) = bounded(1);
        self.core
            .queue(CoreCommand::Dispatch(RenderCommand::ReadProbeCoefficients {
                volume,
                reply,
            }));
        self.core.submit(true)?;
        response.recv().map_err(|_| CoreError::CoreThreadGone)
    }

    /// Finishes any in-flight capture of `volume`, then copies the captured
    /// coefficients into its simulation half. Returns the number of probes
    /// updated.
    ///
    /// # Errors
    ///
    /// Unknown handle or a core thread failure.
    pub fn update_probe_coefficients(&mut self, volume: Handle) -> CoreResult<usize> {
        let pending = self
            .objects
            .get::<LightProbeVolume>(volume)?
            .render_task()
            .filter(|t| !t.is_complete() && !t.is_canceled())
            .cloned();
        match pending {
            Some(task) => self.wait(&task)?,
            None => {
                self.sync_to_core()?;
            }
        }

        let coefficients = self.read_probe_coefficients(volume)?;
        Ok(self
            .objects
            .get_mut::<LightProbeVolume>(volume)?
            .apply_coefficients(&coefficients))
    }

    // =========================================================================
    // RESOURCES & EXTENSIONS
    // =========================================================================

    /// Creates a texture on the core side, optionally cleared to `rgb`.
    ///
    /// # Errors
    ///
    /// A core thread failure.
    pub fn create_texture(
        &mut self,
        desc: TextureDesc,
        rgb: Option<[f32; 3]>,
    ) -> CoreResult<TextureHandle> {
        let (reply, response) = bounded(1);
        self.core
            .queue(CoreCommand::Dispatch(RenderCommand::CreateTexture {
                desc,
                rgb,
                reply,
            }));
        self.core.submit(true)?;
        response.recv().map_err(|_| CoreError::CoreThreadGone)
    }

    /// Queues release of a texture.
    pub fn destroy_texture(&mut self, texture: TextureHandle) {
        self.core
            .queue(CoreCommand::Dispatch(RenderCommand::DestroyTexture(texture)));
    }

    /// Queues registration of an extension.
    pub fn add_extension(&mut self, extension: Box<dyn RendererExtension>) -> ExtensionId {
        let id = ExtensionId(self.next_extension);
        self.next_extension += 1;
        self.core
            .queue(CoreCommand::Dispatch(RenderCommand::AddExtension { id, extension }));
        id
    }

    /// Queues removal of an extension.
    pub fn remove_extension(&mut self, id: ExtensionId) {
        self.core
            .queue(CoreCommand::Dispatch(RenderCommand::RemoveExtension(id)));
    }

    /// Core renderer counters, after everything queued so far ran.
    ///
    /// # Errors
    ///
    /// A core thread failure.
    pub fn renderer_stats(&mut self) -> CoreResult<RendererStats> {
        let (reply, response) = bounded(1);
        self.core
            .queue(CoreCommand::Dispatch(RenderCommand::Stats(reply)));
        self.core.submit(true)?;
        response.recv().map_err(|_| CoreError::CoreThreadGone)
    }

    /// Flushes queued commands and stops the core thread. Every core half
    /// is destroyed on the way out.
    ///
    /// # Errors
    ///
    /// A core thread failure.
    pub fn shutdown(self) -> CoreResult<CoreRenderer> {
        self.core.check_fatal()?;
        let renderer = self.core.shutdown()?;
        info!(frames = renderer.stats().frames, "render world stopped");
        Ok(renderer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::reflection_probe::ReflectionProbe;
    use crate::skybox::Skybox;
    use crate::task::RendererTask;
    use parking_lot::Mutex;
    use tandem_shared::Vec3;

    fn world() -> RenderWorld {
        RenderWorld::new(Box::new(HeadlessBackend::new()), DEFAULT_FRAME_ALLOC_BYTES).unwrap()
    }

    fn frame(world: &mut RenderWorld) {
        world.poll_completions();
        world.sync_to_core().unwrap();
        world.queue_render_frame();
        world.submit(true).unwrap();
    }

    #[test]
    fn test_update_probe_coefficients_waits_for_capture() {
        let mut world = world();
        let mut volume = LightProbeVolume::new().with_probes_per_step(1);
        for i in 0..6 {
            volume.add_probe(Vec3::new(i as f32, 0.0, 0.0));
        }
        let handle = world.create(volume);
        let task = world
            .with_object(handle, |v: &mut LightProbeVolume, s| v.render_probes(s))
            .unwrap();

        assert_eq!(world.update_probe_coefficients(handle).unwrap(), 6);
        assert!(task.is_complete());

        let volume = world.get::<LightProbeVolume>(handle).unwrap();
        let [r, g, b] = crate::backend::scene_radiance(Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(
            volume.probe_coefficients(5),
            Some(ShCoefficients::ambient(r, g, b))
        );
        world.shutdown().unwrap();
    }

    #[test]
    fn test_skybox_filter_task_completes() {
        let mut world = world();
        let texture = world
            .create_texture(TextureDesc::cubemap(64, 1), Some([0.2, 0.4, 0.6]))
            .unwrap();
        let skybox = world.create(Skybox::new());
        let task = world
            .with_object(skybox, |s: &mut Skybox, sched| s.set_texture(Some(texture), sched))
            .unwrap()
            .unwrap();

        frame(&mut world);
        assert!(task.is_complete());
        world.shutdown().unwrap();
    }

    #[test]
    fn test_reflection_probe_capture_sets_filtered_flag() {
        let mut world = world();
        let probe = world.create(ReflectionProbe::new(Vec3::new(1.0, 2.0, 3.0), 5.0));
        let task = world
            .with_object(probe, |p: &mut ReflectionProbe, s| p.ensure_filtered(s))
            .unwrap()
            .unwrap();
        assert!(!world.get::<ReflectionProbe>(probe).unwrap().is_filtered());

        frame(&mut world);
        assert!(task.is_complete());
        frame(&mut world);
        assert!(world.get::<ReflectionProbe>(probe).unwrap().is_filtered());
        assert!(world
            .with_object(probe, |p: &mut ReflectionProbe, s| p.ensure_filtered(s))
            .unwrap()
            .is_none());
        world.shutdown().unwrap();
    }

    #[test]
    fn test_destroyed_target_finishes_task() {
        let mut world = world();
        let handle = world.create(LightProbeVolume::from_grid(
            tandem_shared::Aabb::new(Vec3::ZERO, Vec3::ONE),
            [1, 1, 1],
        ));
        frame(&mut world);

        let task = RendererTask::new(
            "orphan",
            crate::task::TaskWork::RenderLightProbes {
                volume: handle,
                max_per_step: 1,
            },
        );
        world.scheduler().schedule(&task);
        assert!(world.destroy(handle));
        assert!(!world.destroy(handle));

        frame(&mut world);
        assert!(task.is_complete());
        world.shutdown().unwrap();
    }

    #[test]
    fn test_extensions_run_each_frame() {
        struct Counter(Arc<Mutex<u64>>);
        impl RendererExtension for Counter {
            fn location(&self) -> crate::extensions::RenderLocation {
                crate::extensions::RenderLocation::Overlay
            }
            fn name(&self) -> &str {
                "counter"
            }
            fn render(&mut self, frame: &crate::extensions::FrameInfo) {
                *self.0.lock() = frame.frame;
            }
        }

        let mut world = world();
        let seen = Arc::new(Mutex::new(0));
        let id = world.add_extension(Box::new(Counter(Arc::clone(&seen))));
        frame(&mut world);
        frame(&mut world);
        assert_eq!(*seen.lock(), 2);

        world.remove_extension(id);
        frame(&mut world);
        assert_eq!(*seen.lock(), 2);
        assert_eq!(world.renderer_stats().unwrap().extensions_run, 2);
        world.shutdown().unwrap();
    }
}
