//! # Core Renderer
//!
//! State owned by the core thread: the backend, the visibility sets, the
//! task processor and the extensions. Driven by [`RenderCommand`]s.
//!
//! ## Core frame
//!
//! ```text
//! RenderFrame
//!   1. advance tasks      (start ready tasks, one step each)
//!   2. upload probe data  (volumes flagged dirty, [0, active) only)
//!   3. run extensions     (location, priority, registration order)
//! ```

use std::sync::Arc;

use crossbeam_channel::Sender;
use tandem_core::{CoreDispatch, CoreObjectRegistry, CoreResult, Handle};
use tandem_shared::ShCoefficients;
use tracing::{debug, warn};

use crate::extensions::{ExtensionId, ExtensionList, FrameInfo, RendererExtension};
use crate::ibl::RenderBackend;
use crate::light_probe::CoreLightProbeVolume;
use crate::resources::{TextureDesc, TextureHandle};
use crate::scene::RendererScene;
use crate::scheduler::{TaskProcessor, TaskScheduler};
use crate::task::TaskRef;

/// Work counters of the core renderer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RendererStats {
    /// Core frames rendered.
    pub frames: u64,
    /// Last sync point seen.
    pub synced: u64,
    /// Tasks picked up by the processor.
    pub tasks_started: u64,
    /// Task steps run.
    pub task_steps: u64,
    /// Tasks completed on the core side.
    pub tasks_completed: u64,
    /// Light probe volume uploads.
    pub volume_uploads: u64,
    /// Probe positions uploaded.
    pub probes_uploaded: u64,
    /// Volumes whose coefficients changed.
    pub coefficient_updates: u64,
    /// Extension invocations.
    pub extensions_run: u64,
}

/// Renderer commands interpreted on the core thread.
pub enum RenderCommand {
    /// The simulation side published sync point `n`; every packet before
    /// it has been applied.
    SyncPoint(u64),
    /// Render one core frame.
    RenderFrame,
    /// Drive one task out of band.
    ProcessTask {
        /// Task to drive.
        task: TaskRef,
        /// Step until finished.
        force: bool,
    },
    /// Read a volume's coefficients back.
    ReadProbeCoefficients {
        /// Volume to read.
        volume: Handle,
        /// Receives `(probe id, coefficients)` pairs.
        reply: Sender<Vec<(u32, ShCoefficients)>>,
    },
    /// Create a texture, optionally cleared to a color.
    CreateTexture {
        /// Description.
        desc: TextureDesc,
        /// Clear color.
        rgb: Option<[f32; 3]>,
        /// Receives the handle.
        reply: Sender<TextureHandle>,
    },
    /// Release a texture.
    DestroyTexture(TextureHandle),
    /// Register an extension.
    AddExtension {
        /// Id issued by the simulation side.
        id: ExtensionId,
        /// The extension.
        extension: Box<dyn RendererExtension>,
    },
    /// Unregister an extension.
    RemoveExtension(ExtensionId),
    /// Report counters.
    Stats(Sender<RendererStats>),
}

/// Core-thread renderer state.
pub struct CoreRenderer {
    backend: Box<dyn RenderBackend>,
    scene: RendererScene,
    scheduler: Arc<TaskScheduler>,
    tasks: TaskProcessor,
    extensions: ExtensionList,
    synced: u64,
    frame: u64,
    stats: RendererStats,
}

impl CoreRenderer {
    /// Creates the renderer around a loaded backend.
    #[must_use]
    pub fn new(backend: Box<dyn RenderBackend>, scheduler: Arc<TaskScheduler>) -> Self {
        Self {
            backend,
            scene: RendererScene::new(),
            scheduler,
            tasks: TaskProcessor::new(),
            extensions: ExtensionList::new(),
            synced: 0,
            frame: 0,
            stats: RendererStats::default(),
        }
    }

    /// The backend.
    #[must_use]
    pub fn backend(&self) -> &dyn RenderBackend {
        &*self.backend
    }

    /// The backend, mutably.
    pub fn backend_mut(&mut self) -> &mut dyn RenderBackend {
        &mut *self.backend
    }

    /// Visibility sets.
    #[must_use]
    pub const fn scene(&self) -> &RendererScene {
        &self.scene
    }

    /// Visibility sets, mutably.
    pub fn scene_mut(&mut self) -> &mut RendererScene {
        &mut self.scene
    }

    /// Last sync point applied.
    #[must_use]
    pub const fn synced(&self) -> u64 {
        self.synced
    }

    /// Tasks currently in the processor's working set.
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.tasks.active()
    }

    /// Work counters.
    #[must_use]
    pub const fn stats(&self) -> RendererStats {
        self.stats
    }

    /// Renders one core frame.
    pub fn render_frame(&mut self, objects: &mut CoreObjectRegistry<Self>) {
        self.frame += 1;

        let report = self.tasks.advance(
            &self.scheduler,
            self.synced,
            objects,
            &mut *self.backend,
            &mut self.scene,
            false,
        );
        self.record_tasks(report);

        for volume in self.scene.take_dirty_volumes() {
            match objects.get_mut::<CoreLightProbeVolume>(volume) {
                Ok(core) => {
                    let uploaded = core.upload_positions(&mut *self.backend);
                    self.stats.volume_uploads += 1;
                    self.stats.probes_uploaded += uploaded as u64;
                }
                Err(e) => warn!(error = %e, "dirty light probe volume vanished"),
            }
        }
        self.stats.coefficient_updates += self.scene.take_coefficient_changes().len() as u64;

        let info = FrameInfo {
            frame: self.frame,
            synced: self.synced,
        };
        self.stats.extensions_run += self.extensions.render_all(&info) as u64;
        self.stats.frames = self.frame;
        debug!(
            frame = self.frame,
            steps = report.steps,
            completed = report.completed,
            "core frame rendered"
        );
    }

    fn record_tasks(&mut self, report: crate::scheduler::AdvanceReport) {
        self.stats.tasks_started += u64::from(report.started);
        self.stats.task_steps += u64::from(report.steps);
        self.stats.tasks_completed += u64::from(report.completed);
    }
}

impl CoreDispatch for CoreRenderer {
    type Command = RenderCommand;

    fn dispatch(
        &mut self,
        objects: &mut CoreObjectRegistry<Self>,
        command: RenderCommand,
    ) -> CoreResult<()> {
        match command {
            RenderCommand::SyncPoint(point) => {
                self.synced = point;
                self.stats.synced = point;
            }
            RenderCommand::RenderFrame => self.render_frame(objects),
            RenderCommand::ProcessTask { task, force } => {
                let report = self.tasks.process_task(
                    &task,
                    objects,
                    &mut *self.backend,
                    &mut self.scene,
                    force,
                );
                self.record_tasks(report);
            }
            RenderCommand::ReadProbeCoefficients { volume, reply } => {
                let coefficients = match objects.get::<CoreLightProbeVolume>(volume) {
                    Ok(core) => core.read_coefficients(&*self.backend),
                    Err(e) => {
                        warn!(error = %e, "coefficient readback of missing volume");
                        Vec::new()
                    }
                };
                // The requester may have given up.
                let _ = reply.send(coefficients);
            }
            RenderCommand::CreateTexture { desc, rgb, reply } => {
                let texture = self.backend.create_texture(&desc);
                if let Some(rgb) = rgb {
                    self.backend.clear_texture(texture, rgb);
                }
                let _ = reply.send(texture);
            }
            RenderCommand::DestroyTexture(texture) => self.backend.destroy_texture(texture),
            RenderCommand::AddExtension { id, extension } => self.extensions.add(id, extension),
            RenderCommand::RemoveExtension(id) => {
                if self.extensions.remove(id).is_none() {
                    warn!(?id, "removing unknown extension");
                }
            }
            RenderCommand::Stats(reply) => {
                let _ = reply.send(self.stats);
            }
        }
        Ok(())
    }
}
