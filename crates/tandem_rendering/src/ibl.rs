//! # Image Based Lighting Interface
//!
//! Scene capture and cubemap filtering, the GPU work behind light probes,
//! skyboxes and reflection probes. Implemented by the backend.

use tandem_shared::Vec3;

use crate::resources::{BufferHandle, GpuResourceFactory, TextureHandle};

/// Capture and filter operations.
///
/// Each returns `false` (after logging) if an input resource is missing or
/// was never written.
pub trait IblBackend {
    /// Renders the scene from `position` into the six faces of `target`.
    fn capture_scene_cubemap(&mut self, target: TextureHandle, position: Vec3) -> bool;

    /// Projects `cubemap` onto third-order SH and writes one
    /// [`ShCoefficients`](tandem_shared::ShCoefficients) element at `index`
    /// of `output`.
    fn filter_irradiance(&mut self, cubemap: TextureHandle, output: BufferHandle, index: u32)
        -> bool;

    /// Pre-filters `source` into the roughness mip chain of `target`.
    fn filter_radiance(&mut self, source: TextureHandle, target: TextureHandle) -> bool;

    /// Convolves `source` into the diffuse irradiance cubemap `target`.
    fn filter_irradiance_texture(&mut self, source: TextureHandle, target: TextureHandle) -> bool;
}

/// Everything the core renderer needs from a backend.
pub trait RenderBackend: GpuResourceFactory + IblBackend + Send {
    /// Backend name, as passed to [`create_backend`](crate::create_backend).
    fn name(&self) -> &'static str;
}
