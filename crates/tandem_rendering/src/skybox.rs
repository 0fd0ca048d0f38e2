//! # Skybox
//!
//! A radiance cubemap around the scene. Setting a texture schedules a
//! filter task that derives the pre-filtered radiance map (specular IBL)
//! and the irradiance map (diffuse IBL) on the core side.

use std::any::Any;
use std::sync::Arc;

use tandem_core::{
    CoreLink, CoreObject, CoreResult, Handle, SimObject, SyncPacketReader, SyncPacketWriter,
};
use tandem_core::sync::packet::packed_size;
use tandem_shared::{IRRADIANCE_CUBEMAP_SIZE, REFLECTION_CUBEMAP_SIZE};
use tracing::{debug, warn};

use crate::ibl::RenderBackend;
use crate::renderer::CoreRenderer;
use crate::resources::{
    read_texture_ref, texture_ref_size, write_texture_ref, TextureDesc, TextureHandle,
};
use crate::scheduler::TaskScheduler;
use crate::task::{RendererTask, TaskRef, TaskWork};

/// Only the texture changed.
pub const DIRTY_TEXTURE: u32 = 0x01;
/// Every field changed.
pub const DIRTY_EVERYTHING: u32 = 0x02;

/// Simulation half of a skybox.
pub struct Skybox {
    link: CoreLink,
    active: bool,
    brightness: f32,
    texture: Option<TextureHandle>,
    filter_task: Option<TaskRef>,
}

impl Default for Skybox {
    fn default() -> Self {
        Self::new()
    }
}

impl Skybox {
    /// Creates an active skybox with no texture.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            link: CoreLink::new(),
            active: true,
            brightness: 1.0,
            texture: None,
            filter_task: None,
        }
    }

    /// True if the skybox is in use.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Enables or disables the skybox.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        self.link.mark_dirty(DIRTY_EVERYTHING);
    }

    /// Brightness multiplier.
    #[must_use]
    pub const fn brightness(&self) -> f32 {
        self.brightness
    }

    /// Sets the brightness multiplier.
    pub fn set_brightness(&mut self, brightness: f32) {
        self.brightness = brightness;
        self.link.mark_dirty(DIRTY_EVERYTHING);
    }

    /// Radiance texture.
    #[must_use]
    pub const fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    /// Replaces the radiance texture and (re)starts filtering. Returns the
    /// filter task, or `None` if there is nothing to filter yet.
    pub fn set_texture(
        &mut self,
        texture: Option<TextureHandle>,
        scheduler: &TaskScheduler,
    ) -> Option<TaskRef> {
        self.texture = texture;
        self.link.mark_dirty(DIRTY_TEXTURE);
        self.filter(scheduler)
    }

    /// Schedules filtering of the current texture, canceling any filter in
    /// flight. `None` if there is no texture or the skybox is not
    /// registered.
    pub fn filter(&mut self, scheduler: &TaskScheduler) -> Option<TaskRef> {
        if let Some(previous) = self.filter_task.take() {
            previous.cancel();
        }
        self.texture?;
        let skybox = self.link.handle()?;

        let task = RendererTask::new("FilterSkybox", TaskWork::FilterSkybox { skybox });
        scheduler.schedule(&task);
        self.filter_task = Some(Arc::clone(&task));
        Some(task)
    }

    /// The in-flight filter task, if any.
    #[must_use]
    pub fn filter_task(&self) -> Option<&TaskRef> {
        self.filter_task.as_ref()
    }
}

impl SimObject<CoreRenderer> for Skybox {
    fn link(&self) -> &CoreLink {
        &self.link
    }

    fn link_mut(&mut self) -> &mut CoreLink {
        &mut self.link
    }

    fn create_core(&self) -> Box<dyn CoreObject<CoreRenderer>> {
        Box::new(CoreSkybox::default())
    }

    fn sync_size(&self, dirty: u32) -> usize {
        let texture = texture_ref_size(self.texture);
        if dirty & DIRTY_EVERYTHING != 0 {
            packed_size::<u8>() + packed_size::<f32>() + texture
        } else if dirty & DIRTY_TEXTURE != 0 {
            texture
        } else {
            0
        }
    }

    fn write_sync(&mut self, dirty: u32, writer: &mut SyncPacketWriter<'_>) {
        if dirty & DIRTY_EVERYTHING != 0 {
            writer.write_bool(self.active);
            writer.write(&self.brightness);
            write_texture_ref(writer, self.texture);
        } else if dirty & DIRTY_TEXTURE != 0 {
            write_texture_ref(writer, self.texture);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn on_unregister(&mut self) {
        if let Some(task) = self.filter_task.take() {
            task.cancel();
        }
    }
}

/// Core half of a skybox.
#[derive(Debug, Default)]
pub struct CoreSkybox {
    active: bool,
    brightness: f32,
    texture: Option<TextureHandle>,
    radiance: Option<TextureHandle>,
    irradiance: Option<TextureHandle>,
    filtered: bool,
}

impl CoreSkybox {
    /// True if active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Brightness multiplier.
    #[must_use]
    pub const fn brightness(&self) -> f32 {
        self.brightness
    }

    /// Source radiance texture.
    #[must_use]
    pub const fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    /// Filtered outputs `(radiance, irradiance)`, once filtering ran for the
    /// current texture.
    #[must_use]
    pub fn filtered_maps(&self) -> Option<(TextureHandle, TextureHandle)> {
        if !self.filtered {
            return None;
        }
        self.radiance.zip(self.irradiance)
    }

    /// Filters the source texture into the radiance and irradiance maps.
    pub fn filter(&mut self, backend: &mut dyn RenderBackend) {
        let Some(source) = self.texture else {
            warn!("skybox has no texture to filter");
            return;
        };
        let radiance = *self.radiance.get_or_insert_with(|| {
            backend.create_texture(&TextureDesc::cubemap(
                REFLECTION_CUBEMAP_SIZE,
                REFLECTION_CUBEMAP_SIZE.ilog2() + 1,
            ))
        });
        let irradiance = *self.irradiance.get_or_insert_with(|| {
            backend.create_texture(&TextureDesc::cubemap(IRRADIANCE_CUBEMAP_SIZE, 1))
        });

        self.filtered = backend.filter_radiance(source, radiance)
            && backend.filter_irradiance_texture(source, irradiance);
        debug!(filtered = self.filtered, "skybox filtered");
    }
}

impl CoreObject<CoreRenderer> for CoreSkybox {
    fn apply_sync(
        &mut self,
        handle: Handle,
        dirty: u32,
        reader: &mut SyncPacketReader<'_>,
        ctx: &mut CoreRenderer,
    ) -> CoreResult<()> {
        let was_active = self.active;
        let previous_texture = self.texture;
        if dirty & DIRTY_EVERYTHING != 0 {
            self.active = reader.read_bool()?;
            self.brightness = reader.read()?;
            self.texture = read_texture_ref(reader)?;
        } else if dirty & DIRTY_TEXTURE != 0 {
            self.texture = read_texture_ref(reader)?;
        }
        if self.texture != previous_texture {
            self.filtered = false;
        }

        match (was_active, self.active) {
            (false, true) => ctx.scene_mut().notify_skybox_added(handle),
            (true, false) => ctx.scene_mut().notify_skybox_removed(handle),
            _ => {}
        }
        Ok(())
    }

    fn destroy(&mut self, handle: Handle, ctx: &mut CoreRenderer) {
        if self.active {
            ctx.scene_mut().notify_skybox_removed(handle);
        }
        let backend = ctx.backend_mut();
        for texture in [self.radiance.take(), self.irradiance.take()].into_iter().flatten() {
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
