//! # Renderer Extensions
//!
//! User hooks that run inside the core frame at a fixed location.
//!
//! Order is total and deterministic:
//!
//! 1. [`RenderLocation`] (frame order)
//! 2. priority, highest first
//! 3. registration order ([`ExtensionId`]) for equal priorities

use std::cmp::Reverse;
use std::collections::BTreeMap;

use tracing::trace;

/// Where in the core frame an extension runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderLocation {
    /// Before any rendering, after tasks advanced.
    Prepare,
    /// Before the base pass.
    PreBasePass,
    /// After the base pass.
    PostBasePass,
    /// After lighting.
    PostLightPass,
    /// On top of the finished frame.
    Overlay,
}

/// Identifies a registered extension. Issued in registration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionId(pub u64);

/// Per-frame data handed to extensions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// Core frame counter.
    pub frame: u64,
    /// Last sync point applied before this frame.
    pub synced: u64,
}

/// A hook run every core frame.
pub trait RendererExtension: Send {
    /// Frame location.
    fn location(&self) -> RenderLocation;

    /// Higher runs first within a location.
    fn priority(&self) -> i32 {
        0
    }

    /// Name, for diagnostics.
    fn name(&self) -> &str;

    /// Runs the extension.
    fn render(&mut self, frame: &FrameInfo);
}

type ExtensionKey = (RenderLocation, Reverse<i32>, ExtensionId);

/// Extensions sorted by run order.
#[derive(Default)]
pub struct ExtensionList {
    sorted: BTreeMap<ExtensionKey, Box<dyn RendererExtension>>,
}

impl ExtensionList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    /// True if no extension is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Registers an extension. Location and priority are read once, here.
    pub fn add(&mut self, id: ExtensionId, extension: Box<dyn RendererExtension>) {
        let key = (extension.location(), Reverse(extension.priority()), id);
        self.sorted.insert(key, extension);
    }

    /// Unregisters an extension. Returns it if it was registered.
    pub fn remove(&mut self, id: ExtensionId) -> Option<Box<dyn RendererExtension>> {
        let key = *self.sorted.keys().find(|(_, _, k)| *k == id)?;
        self.sorted.remove(&key)
    }

    /// Names in run order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.sorted.values().map(|e| e.name().to_owned()).collect()
    }

    /// Runs every extension in order. Returns how many ran.
    pub fn render_all(&mut self, frame: &FrameInfo) -> usize {
        for extension in self.sorted.values_mut() {
            trace!(extension = extension.name(), frame = frame.frame, "extension");
            extension.render(frame);
        }
        self.sorted.len()
    }
}
