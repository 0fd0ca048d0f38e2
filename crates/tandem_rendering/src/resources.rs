//! # GPU Resource Interface
//!
//! Core objects never call a graphics API. They fill in a description and
//! ask a [`GpuResourceFactory`] for the resource; the factory is whatever
//! backend the application loaded.
//!
//! Every factory call is core-context only.

use tandem_core::{CoreResult, Handle, SyncPacketReader, SyncPacketWriter};

// =============================================================================
// HANDLES
// =============================================================================

/// A GPU buffer owned by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub Handle);

/// A GPU texture owned by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub Handle);

// =============================================================================
// DESCRIPTIONS
// =============================================================================

/// How a buffer is accessed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Written rarely, read by shaders.
    Static,
    /// Rewritten every frame.
    Dynamic,
}

/// Description of a structured buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuBufferDesc {
    /// Size of one element in bytes.
    pub element_size: u32,
    /// Number of elements.
    pub element_count: u32,
    /// Access pattern.
    pub usage: BufferUsage,
}

impl GpuBufferDesc {
    /// Structured buffer of `count` elements of `T`.
    #[must_use]
    pub const fn structured<T>(count: u32, usage: BufferUsage) -> Self {
        Self {
            element_size: std::mem::size_of::<T>() as u32,
            element_count: count,
            usage,
        }
    }

    /// Total size in bytes.
    #[inline]
    #[must_use]
    pub const fn byte_size(&self) -> usize {
        self.element_size as usize * self.element_count as usize
    }
}

/// Texel formats the renderer asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    /// Half-float RGB, for HDR captures.
    Rgb16Float,
    /// Half-float RGBA.
    Rgba16Float,
    /// 8-bit RGBA.
    Rgba8,
}

/// Texture shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureKind {
    /// Plain 2D texture.
    Tex2D,
    /// Six-faced cubemap.
    Cube,
}

/// Description of a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    /// Shape.
    pub kind: TextureKind,
    /// Texel format.
    pub format: TextureFormat,
    /// Width in texels (face width for cubemaps).
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Mip levels (1 = no mips).
    pub mip_levels: u32,
    /// Can be rendered into.
    pub render_target: bool,
}

impl TextureDesc {
    /// Square HDR cubemap usable as a render target.
    #[must_use]
    pub const fn cubemap(size: u32, mip_levels: u32) -> Self {
        Self {
            kind: TextureKind::Cube,
            format: TextureFormat::Rgb16Float,
            width: size,
            height: size,
            mip_levels,
            render_target: true,
        }
    }
}

// =============================================================================
// FACTORY
// =============================================================================

/// Resource creation interface implemented by a backend.
///
/// Operations on handles the backend does not know are skipped with a
/// warning and report `false`/`None`, never panic.
pub trait GpuResourceFactory {
    /// Creates a zero-filled buffer.
    fn create_buffer(&mut self, desc: &GpuBufferDesc) -> BufferHandle;

    /// Releases a buffer.
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Description a buffer was created with.
    fn buffer_desc(&self, buffer: BufferHandle) -> Option<GpuBufferDesc>;

    /// Writes `data` at byte `offset`.
    fn write_buffer(&mut self, buffer: BufferHandle, offset: usize, data: &[u8]) -> bool;

    /// Reads `len` bytes at byte `offset`.
    fn read_buffer(&self, buffer: BufferHandle, offset: usize, len: usize) -> Option<Vec<u8>>;

    /// Copies the first `len` bytes of `src` into `dst`.
    fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, len: usize) -> bool;

    /// Creates a texture.
    fn create_texture(&mut self, desc: &TextureDesc) -> TextureHandle;

    /// Releases a texture.
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Description a texture was created with.
    fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc>;

    /// Clears every texel of `texture` to `rgb`.
    fn clear_texture(&mut self, texture: TextureHandle, rgb: [f32; 3]) -> bool;
}

// =============================================================================
// PACKET ENCODING
// =============================================================================

/// Packed size of an optional texture reference: presence flag plus the
/// handle's index and generation when present.
#[must_use]
pub const fn texture_ref_size(texture: Option<TextureHandle>) -> usize {
    match texture {
        Some(_) => 1 + 2 * std::mem::size_of::<u32>(),
        None => 1,
    }
}

/// Writes an optional texture reference.
pub fn write_texture_ref(writer: &mut SyncPacketWriter<'_>, texture: Option<TextureHandle>) {
    writer.write_bool(texture.is_some());
    if let Some(TextureHandle(handle)) = texture {
        writer.write(&handle.index());
        writer.write(&handle.generation());
    }
}

/// Reads an optional texture reference.
///
/// # Errors
///
/// Packet underflow or a malformed presence flag.
pub fn read_texture_ref(reader: &mut SyncPacketReader<'_>) -> CoreResult<Option<TextureHandle>> {
    if !reader.read_bool()? {
        return Ok(None);
    }
    let index: u32 = reader.read()?;
    let generation: u32 = reader.read()?;
    Ok(Some(TextureHandle(Handle::new(index, generation))))
}
