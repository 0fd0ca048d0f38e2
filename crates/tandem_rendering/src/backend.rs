//! # Backends
//!
//! Backend selection plus the headless backend.
//!
//! The headless backend keeps buffers in memory and models a texture by a
//! single clear color. Captures and filters are deterministic functions of
//! their inputs, which makes every GPU-side result reproducible in tests.

use tandem_core::{assert_core_context, HandleArena};
use tandem_shared::{ShCoefficients, Vec3};
use tracing::{info, warn};

use crate::ibl::{IblBackend, RenderBackend};
use crate::resources::{
    BufferHandle, GpuBufferDesc, GpuResourceFactory, TextureDesc, TextureHandle,
};

/// Loads a backend by name. Unknown names return `None`.
#[must_use]
pub fn create_backend(name: &str) -> Option<Box<dyn RenderBackend>> {
    match name {
        HeadlessBackend::NAME => {
            info!(backend = name, "render backend loaded");
            Some(Box::new(HeadlessBackend::new()))
        }
        _ => {
            warn!(backend = name, "unknown render backend");
            None
        }
    }
}

/// Radiance the headless backend "sees" when capturing at `position`.
#[must_use]
pub fn scene_radiance(position: Vec3) -> [f32; 3] {
    [
        0.25 + 0.05 * position.x.abs(),
        0.25 + 0.05 * position.y.abs(),
        0.25 + 0.05 * position.z.abs(),
    ]
}

/// Work counters of the headless backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Buffers created.
    pub buffers_created: u32,
    /// Textures created.
    pub textures_created: u32,
    /// Scene captures.
    pub captures: u32,
    /// Filter passes of any kind.
    pub filters: u32,
}

#[derive(Debug)]
struct HeadlessBuffer {
    desc: GpuBufferDesc,
    data: Vec<u8>,
}

#[derive(Debug)]
struct HeadlessTexture {
    desc: TextureDesc,
    color: Option<[f32; 3]>,
}

/// In-memory backend with no GPU behind it.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    buffers: HandleArena<HeadlessBuffer>,
    textures: HandleArena<HeadlessTexture>,
    stats: HeadlessStats,
}

impl HeadlessBackend {
    /// Name used by [`create_backend`].
    pub const NAME: &'static str = "headless";

    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Work counters.
    #[must_use]
    pub const fn stats(&self) -> HeadlessStats {
        self.stats
    }

    /// Live buffer count.
    #[must_use]
    pub const fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Live texture count.
    #[must_use]
    pub const fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Clear color of a texture, if it was ever written.
    #[must_use]
    pub fn texture_color(&self, texture: TextureHandle) -> Option<[f32; 3]> {
        self.textures.get(texture.0).and_then(|t| t.color)
    }

    fn source_color(&self, texture: TextureHandle, operation: &str) -> Option<[f32; 3]> {
        let color = self.texture_color(texture);
        if color.is_none() {
            warn!(texture = %texture.0, operation, "source texture missing or unwritten, skipping");
        }
        color
    }

    fn set_color(&mut self, texture: TextureHandle, color: [f32; 3], operation: &str) -> bool {
        if let Some(target) = self.textures.get_mut(texture.0) {
            target.color = Some(color);
            true
        } else {
            warn!(texture = %texture.0, operation, "target texture missing, skipping");
            false
        }
    }
}

impl GpuResourceFactory for HeadlessBackend {
    fn create_buffer(&mut self, desc: &GpuBufferDesc) -> BufferHandle {
        assert_core_context("create_buffer");
        self.stats.buffers_created += 1;
        BufferHandle(self.buffers.insert(HeadlessBuffer {
            desc: *desc,
            data: vec![0; desc.byte_size()],
        }))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(buffer.0).is_none() {
            warn!(buffer = %buffer.0, "destroying unknown buffer");
        }
    }

    fn buffer_desc(&self, buffer: BufferHandle) -> Option<GpuBufferDesc> {
        self.buffers.get(buffer.0).map(|b| b.desc)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: usize, data: &[u8]) -> bool {
        let Some(target) = self.buffers.get_mut(buffer.0) else {
            warn!(buffer = %buffer.0, "write to unknown buffer skipped");
            return false;
        };
        let Some(dst) = target.data.get_mut(offset..offset + data.len()) else {
            warn!(buffer = %buffer.0, offset, len = data.len(), "write out of bounds skipped");
            return false;
        };
        dst.copy_from_slice(data);
        true
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: usize, len: usize) -> Option<Vec<u8>> {
        let source = self.buffers.get(buffer.0)?;
        source.data.get(offset..offset + len).map(<[u8]>::to_vec)
    }

    fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, len: usize) -> bool {
        let Some(bytes) = self.read_buffer(src, 0, len) else {
            warn!(buffer = %src.0, len, "copy source missing or too small, skipping");
            return false;
        };
        self.write_buffer(dst, 0, &bytes)
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureHandle {
        assert_core_context("create_texture");
        self.stats.textures_created += 1;
        TextureHandle(self.textures.insert(HeadlessTexture {
            desc: *desc,
            color: None,
        }))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(texture.0).is_none() {
            warn!(texture = %texture.0, "destroying unknown texture");
        }
    }

    fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc> {
        self.textures.get(texture.0).map(|t| t.desc)
    }

    fn clear_texture(&mut self, texture: TextureHandle, rgb: [f32; 3]) -> bool {
        self.set_color(texture, rgb, "clear")
    }
}

impl IblBackend for HeadlessBackend {
    fn capture_scene_cubemap(&mut self, target: TextureHandle, position: Vec3) -> bool {
        self.stats.captures += 1;
        self.set_color(target, scene_radiance(position), "capture")
    }

    fn filter_irradiance(
        &mut self,
        cubemap: TextureHandle,
        output: BufferHandle,
        index: u32,
    ) -> bool {
        let Some([r, g, b]) = self.source_color(cubemap, "filter_irradiance") else {
            return false;
        };
        self.stats.filters += 1;
        let coefficients = ShCoefficients::ambient(r, g, b);
        self.write_buffer(
            output,
            index as usize * ShCoefficients::SIZE,
            bytemuck::bytes_of(&coefficients),
        )
    }

    fn filter_radiance(&mut self, source: TextureHandle, target: TextureHandle) -> bool {
        let Some(color) = self.source_color(source, "filter_radiance") else {
            return false;
        };
        self.stats.filters += 1;
        self.set_color(target, color, "filter_radiance")
    }

    fn filter_irradiance_texture(&mut self, source: TextureHandle, target: TextureHandle) -> bool {
        let Some(color) = self.source_color(source, "filter_irradiance_texture") else {
            return false;
        };
        self.stats.filters += 1;
        self.set_color(target, color, "filter_irradiance_texture")
    }
}

impl RenderBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::BufferUsage;
    use tandem_core::context::{enter, ExecutionContext};

    #[test]
    fn test_create_backend_by_name() {
        assert!(create_backend("headless").is_some());
        assert!(create_backend("vulkan-9000").is_none());
    }

    #[test]
    fn test_buffer_write_read_copy() {
        let _ctx = enter(ExecutionContext::Core);
        let mut backend = HeadlessBackend::new();
        let desc = GpuBufferDesc::structured::<u32>(4, BufferUsage::Static);
        let a = backend.create_buffer(&desc);
        let b = backend.create_buffer(&desc);

        assert!(backend.write_buffer(a, 4, &[1, 2, 3, 4]));
        assert!(!backend.write_buffer(a, 14, &[0; 4]), "out of bounds");
        assert!(backend.copy_buffer(a, b, 8));
        assert_eq!(backend.read_buffer(b, 4, 4), Some(vec![1, 2, 3, 4]));

        backend.destroy_buffer(a);
        assert!(!backend.write_buffer(a, 0, &[0]));
        assert_eq!(backend.live_buffers(), 1);
    }

    #[test]
    fn test_capture_then_filter_irradiance() {
        let _ctx = enter(ExecutionContext::Core);
        let mut backend = HeadlessBackend::new();
        let cubemap = backend.create_texture(&TextureDesc::cubemap(32, 1));
        let out = backend.create_buffer(&GpuBufferDesc::structured::<ShCoefficients>(
            2,
            BufferUsage::Static,
        ));

        // Filtering an unwritten texture degrades to a skipped pass.
        assert!(!backend.filter_irradiance(cubemap, out, 0));

        let position = Vec3::new(2.0, 0.0, -4.0);
        assert!(backend.capture_scene_cubemap(cubemap, position));
        assert!(backend.filter_irradiance(cubemap, out, 1));

        let bytes = backend
            .read_buffer(out, ShCoefficients::SIZE, ShCoefficients::SIZE)
            .unwrap();
        let coefficients: ShCoefficients = bytemuck::pod_read_unaligned(&bytes);
        let [r, g, b] = scene_radiance(position);
        assert_eq!(coefficients, ShCoefficients::ambient(r, g, b));
    }

    #[test]
    #[should_panic(expected = "is core-only")]
    fn test_resource_creation_off_core_panics() {
        let mut backend = HeadlessBackend::new();
        let _ = backend.create_texture(&TextureDesc::cubemap(8, 1));
    }
}
