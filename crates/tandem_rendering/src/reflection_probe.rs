//! # Reflection Probe
//!
//! A spherical region whose specular reflections come from a filtered
//! cubemap. The cubemap is either captured from the scene at the probe's
//! position or supplied as a custom texture.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tandem_core::{
    CoreLink, CoreObject, CoreResult, Handle, SimObject, SyncPacketReader, SyncPacketWriter,
};
use tandem_core::sync::packet::packed_size;
use tandem_shared::{Vec3, REFLECTION_CUBEMAP_SIZE};
use tracing::{debug, warn};

use crate::ibl::RenderBackend;
use crate::renderer::CoreRenderer;
use crate::resources::{
    read_texture_ref, texture_ref_size, write_texture_ref, TextureDesc, TextureHandle,
};
use crate::scheduler::TaskScheduler;
use crate::task::{RendererTask, TaskRef, TaskWork};

/// Position or radius changed.
pub const DIRTY_TRANSFORM: u32 = 1 << 0;
/// Active flag changed.
pub const DIRTY_ACTIVE: u32 = 1 << 1;
/// Custom texture changed.
pub const DIRTY_TEXTURE: u32 = 1 << 2;

/// Simulation half of a reflection probe.
pub struct ReflectionProbe {
    link: CoreLink,
    position: Vec3,
    radius: f32,
    custom_texture: Option<TextureHandle>,
    active: bool,
    filtered: Arc<AtomicBool>,
    task: Option<TaskRef>,
}

impl ReflectionProbe {
    /// Creates an active sphere probe.
    #[must_use]
    pub fn new(position: Vec3, radius: f32) -> Self {
        Self {
            link: CoreLink::new(),
            position,
            radius,
            custom_texture: None,
            active: true,
            filtered: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Probe center.
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Moves the probe. A captured probe must be captured again.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        if self.custom_texture.is_none() {
            self.filtered.store(false, Ordering::Release);
        }
        self.link.mark_dirty(DIRTY_TRANSFORM);
    }

    /// Influence radius.
    #[must_use]
    pub const fn radius(&self) -> f32 {
        self.radius
    }

    /// Sets the influence radius.
    pub fn set_radius(&mut self, radius: f32) {
        self.radius = radius;
        self.link.mark_dirty(DIRTY_TRANSFORM);
    }

    /// True if the probe contributes reflections.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Enables or disables the probe.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        self.link.mark_dirty(DIRTY_ACTIVE);
    }

    /// Custom cubemap used instead of a scene capture.
    #[must_use]
    pub const fn custom_texture(&self) -> Option<TextureHandle> {
        self.custom_texture
    }

    /// Replaces the custom cubemap. The probe needs filtering afterwards.
    pub fn set_custom_texture(&mut self, texture: Option<TextureHandle>) {
        self.custom_texture = texture;
        self.filtered.store(false, Ordering::Release);
        self.link.mark_dirty(DIRTY_TEXTURE);
    }

    /// True once a capture or filter task for the current source completed.
    #[must_use]
    pub fn is_filtered(&self) -> bool {
        self.filtered.load(Ordering::Acquire)
    }

    /// The in-flight capture/filter task, if any.
    #[must_use]
    pub fn task(&self) -> Option<&TaskRef> {
        self.task.as_ref()
    }

    /// Schedules a scene capture followed by filtering.
    ///
    /// # Panics
    ///
    /// If the probe is not registered.
    pub fn capture(&mut self, scheduler: &TaskScheduler) -> TaskRef {
        let Some(probe) = self.link.handle() else {
            panic!("Reflection probe captured before registration!");
        };
        self.run_task(
            scheduler,
            RendererTask::new("CaptureReflectionProbe", TaskWork::CaptureReflectionProbe { probe }),
        )
    }

    /// Schedules filtering of the custom texture. `None` without one.
    ///
    /// # Panics
    ///
    /// If the probe is not registered.
    pub fn filter(&mut self, scheduler: &TaskScheduler) -> Option<TaskRef> {
        self.custom_texture?;
        let Some(probe) = self.link.handle() else {
            panic!("Reflection probe filtered before registration!");
        };
        Some(self.run_task(
            scheduler,
            RendererTask::new("FilterReflectionProbe", TaskWork::FilterReflectionProbe { probe }),
        ))
    }

    /// Filters the custom texture if there is one, captures otherwise.
    /// `None` if the probe is already filtered.
    pub fn ensure_filtered(&mut self, scheduler: &TaskScheduler) -> Option<TaskRef> {
        if self.is_filtered() {
            return None;
        }
        if self.custom_texture.is_some() {
            self.filter(scheduler)
        } else {
            Some(self.capture(scheduler))
        }
    }

    fn run_task(&mut self, scheduler: &TaskScheduler, task: TaskRef) -> TaskRef {
        if let Some(previous) = self.task.take() {
            previous.cancel();
        }
        self.filtered.store(false, Ordering::Release);

        let filtered = Arc::clone(&self.filtered);
        task.on_complete(move || filtered.store(true, Ordering::Release));
        scheduler.schedule(&task);
        self.task = Some(Arc::clone(&task));
        task
    }
}

impl SimObject<CoreRenderer> for ReflectionProbe {
    fn link(&self) -> &CoreLink {
        &self.link
    }

    fn link_mut(&mut self) -> &mut CoreLink {
        &mut self.link
    }

    fn create_core(&self) -> Box<dyn CoreObject<CoreRenderer>> {
        Box::new(CoreReflectionProbe::default())
    }

    fn sync_size(&self, dirty: u32) -> usize {
        let mut size = 0;
        if dirty & DIRTY_TRANSFORM != 0 {
            size += packed_size::<Vec3>() + packed_size::<f32>();
        }
        if dirty & DIRTY_ACTIVE != 0 {
            size += packed_size::<u8>();
        }
        if dirty & DIRTY_TEXTURE != 0 {
            size += texture_ref_size(self.custom_texture);
        }
        size
    }

    fn write_sync(&mut self, dirty: u32, writer: &mut SyncPacketWriter<'_>) {
        if dirty & DIRTY_TRANSFORM != 0 {
            writer.write(&self.position);
            writer.write(&self.radius);
        }
        if dirty & DIRTY_ACTIVE != 0 {
            writer.write_bool(self.active);
        }
        if dirty & DIRTY_TEXTURE != 0 {
            write_texture_ref(writer, self.custom_texture);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn on_unregister(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel();
        }
    }
}

/// Core half of a reflection probe.
#[derive(Debug, Default)]
pub struct CoreReflectionProbe {
    position: Vec3,
    radius: f32,
    active: bool,
    custom_texture: Option<TextureHandle>,
    capture_target: Option<TextureHandle>,
    filtered: Option<TextureHandle>,
    has_filtered: bool,
}

impl CoreReflectionProbe {
    /// Probe center.
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Influence radius.
    #[must_use]
    pub const fn radius(&self) -> f32 {
        self.radius
    }

    /// True if active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// The filtered cubemap, once a capture or filter succeeded.
    #[must_use]
    pub fn filtered_texture(&self) -> Option<TextureHandle> {
        self.filtered.filter(|_| self.has_filtered)
    }

    /// Captures the scene at the probe position and filters the result.
    pub fn capture(&mut self, backend: &mut dyn RenderBackend) {
        let target = *self.capture_target.get_or_insert_with(|| {
            backend.create_texture(&TextureDesc::cubemap(REFLECTION_CUBEMAP_SIZE, 1))
        });
        if !backend.capture_scene_cubemap(target, self.position) {
            self.has_filtered = false;
            return;
        }
        self.filter_from(target, backend);
    }

    /// Filters the custom texture.
    pub fn filter(&mut self, backend: &mut dyn RenderBackend) {
        let Some(source) = self.custom_texture else {
            warn!("reflection probe has no custom texture to filter");
            return;
        };
        self.filter_from(source, backend);
    }

    fn filter_from(&mut self, source: TextureHandle, backend: &mut dyn RenderBackend) {
        let filtered = *self.filtered.get_or_insert_with(|| {
            backend.create_texture(&TextureDesc::cubemap(
                REFLECTION_CUBEMAP_SIZE,
                REFLECTION_CUBEMAP_SIZE.ilog2() + 1,
            ))
        });
        self.has_filtered = backend.filter_radiance(source, filtered);
        debug!(filtered = self.has_filtered, "reflection probe filtered");
    }
}

impl CoreObject<CoreRenderer> for CoreReflectionProbe {
    fn apply_sync(
        &mut self,
        handle: Handle,
        dirty: u32,
        reader: &mut SyncPacketReader<'_>,
        ctx: &mut CoreRenderer,
    ) -> CoreResult<()> {
        let was_active = self.active;
        if dirty & DIRTY_TRANSFORM != 0 {
            self.position = reader.read()?;
            self.radius = reader.read()?;
        }
        if dirty & DIRTY_ACTIVE != 0 {
            self.active = reader.read_bool()?;
        }
        if dirty & DIRTY_TEXTURE != 0 {
            self.custom_texture = read_texture_ref(reader)?;
            self.has_filtered = false;
        }

        let scene = ctx.scene_mut();
        match (was_active, self.active) {
            (false, true) => scene.notify_reflection_probe_added(handle),
            (true, false) => scene.notify_reflection_probe_removed(handle),
            (true, true) => scene.notify_reflection_probe_updated(handle),
            (false, false) => {}
        }
        Ok(())
    }

    fn destroy(&mut self, handle: Handle, ctx: &mut CoreRenderer) {
        if self.active {
            ctx.scene_mut().notify_reflection_probe_removed(handle);
        }
        let backend = ctx.backend_mut();
        for texture in [self.capture_target.take(), self.filtered.take()]
            .into_iter()
            .flatten()
        {
            backend.destroy_texture(texture);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
