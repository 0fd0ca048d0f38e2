//! # TANDEM Rendering
//!
//! The renderer side of the dual-context model: deferred GPU tasks, the
//! scene objects that spawn them, and the core-thread renderer that runs
//! them.
//!
//! ```text
//!   SIMULATION                                   CORE THREAD
//!   ──────────                                   ───────────
//!   RenderWorld                                  CoreRenderer
//!    ├─ LightProbeVolume ── sync packets ──────►  ├─ CoreLightProbeVolume
//!    ├─ Skybox                                    ├─ CoreSkybox
//!    ├─ ReflectionProbe                           ├─ CoreReflectionProbe
//!    │                                            │
//!    └─ TaskScheduler ◄──── Arc<RendererTask> ───►└─ TaskProcessor
//!        schedule / poll_completions                  advance per frame
//! ```
//!
//! ## Architecture Rules
//!
//! 1. **Core halves touch the GPU only through [`RenderBackend`]** - no
//!    graphics API types cross this crate
//! 2. **Tasks start after the sync that follows their scheduling** - the
//!    data a task needs is always on the core side before it runs
//! 3. **Cancellation is cooperative** - a canceled task never fires its
//!    completion callback

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod backend;
pub mod extensions;
pub mod ibl;
pub mod light_probe;
pub mod reflection_probe;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod scheduler;
pub mod skybox;
pub mod task;
pub mod world;

pub use backend::{create_backend, HeadlessBackend};
pub use extensions::{ExtensionId, FrameInfo, RenderLocation, RendererExtension};
pub use ibl::{IblBackend, RenderBackend};
pub use light_probe::{CoreLightProbeVolume, LightProbeVolume, ProbeState};
pub use reflection_probe::{CoreReflectionProbe, ReflectionProbe};
pub use renderer::{CoreRenderer, RenderCommand, RendererStats};
pub use resources::{
    BufferHandle, BufferUsage, GpuBufferDesc, GpuResourceFactory, TextureDesc, TextureFormat,
    TextureHandle, TextureKind,
};
pub use scene::RendererScene;
pub use scheduler::{AdvanceReport, SchedulerStats, TaskProcessor, TaskScheduler};
pub use skybox::{CoreSkybox, Skybox};
pub use task::{RendererTask, StepOutcome, TaskEnv, TaskRef, TaskState, TaskWork};
pub use world::{RenderWorld, DEFAULT_FRAME_ALLOC_BYTES};
