//! # Dual Objects
//!
//! A scene entity is a pair of objects:
//!
//! - a [`SimObject`] on the simulation context, holding authoritative state
//!   and dirty bits
//! - a [`CoreObject`] on the core context, rebuilt only from sync packets
//!
//! The two are linked by a [`Handle`] issued by the [`SimObjectRegistry`]
//! and mirrored by the [`CoreObjectRegistry`]. Neither half holds a pointer
//! to the other.
//!
//! `C` is the core context type handed to core objects (for example the
//! renderer state that receives "added"/"removed" notifications).

use std::any::{type_name, Any};

use tracing::{debug, trace};

use crate::context::assert_core_context;
use crate::error::{CoreError, CoreResult};
use crate::memory::{FrameAlloc, FrameSlice, Handle, HandleArena};
use crate::sync::dirty::DirtyFlags;
use crate::sync::packet::{SyncPacketReader, SyncPacketWriter, SYNC_HEADER_SIZE};

// =============================================================================
// LINK
// =============================================================================

/// Simulation-side bookkeeping every [`SimObject`] embeds.
#[derive(Debug, Default)]
pub struct CoreLink {
    handle: Option<Handle>,
    dirty: DirtyFlags,
}

impl CoreLink {
    /// Creates an unregistered link.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            handle: None,
            dirty: DirtyFlags::new(),
        }
    }

    /// Handle of the core half, once registered.
    #[inline]
    #[must_use]
    pub const fn handle(&self) -> Option<Handle> {
        self.handle
    }

    /// Marks fields as changed.
    #[inline]
    pub fn mark_dirty(&self, bits: u32) {
        self.dirty.mark(bits);
    }

    /// Pending dirty bits.
    #[inline]
    #[must_use]
    pub fn dirty(&self) -> &DirtyFlags {
        &self.dirty
    }
}

// =============================================================================
// OBJECT TRAITS
// =============================================================================

/// Simulation half of a scene entity.
pub trait SimObject<C>: Any + Send {
    /// Link to the core half.
    fn link(&self) -> &CoreLink;

    /// Link to the core half, mutably.
    fn link_mut(&mut self) -> &mut CoreLink;

    /// Builds the core half. Called once, at registration.
    fn create_core(&self) -> Box<dyn CoreObject<C>>;

    /// Packet body size for `dirty`, excluding the header.
    fn sync_size(&self, dirty: u32) -> usize;

    /// Writes the packet body for `dirty`.
    ///
    /// Must write exactly [`sync_size`](Self::sync_size) bytes. Collection
    /// objects drop entries they report as removed here.
    fn write_sync(&mut self, dirty: u32, writer: &mut SyncPacketWriter<'_>);

    /// Upcast for typed lookups.
    fn as_any(&self) -> &dyn Any;

    /// Upcast for typed lookups.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Called when the object leaves the registry. Cancel outstanding work
    /// here.
    fn on_unregister(&mut self) {}

    /// Shorthand for `link().mark_dirty(bits)`.
    #[inline]
    fn mark_dirty(&self, bits: u32) {
        self.link().mark_dirty(bits);
    }

    /// Builds this object's packet into `alloc`.
    ///
    /// Consumes the dirty bits. Returns `None` when nothing was dirty, so
    /// clean objects never produce empty packets.
    ///
    /// # Errors
    ///
    /// Propagates allocator errors.
    fn build_sync_packet(&mut self, alloc: &mut FrameAlloc) -> CoreResult<Option<FrameSlice>> {
        let dirty = self.link().dirty().take();
        if dirty == 0 {
            return Ok(None);
        }

        let slice = alloc.alloc(SYNC_HEADER_SIZE + self.sync_size(dirty));
        let mut writer = SyncPacketWriter::new(alloc.bytes_mut(slice)?);
        writer.write_header(dirty);
        self.write_sync(dirty, &mut writer);
        writer.finish();
        Ok(Some(slice))
    }
}

/// Core half of a scene entity.
pub trait CoreObject<C>: Any + Send {
    /// Called once on the core context before the first packet.
    fn initialize(&mut self, handle: Handle, ctx: &mut C) {
        let _ = (handle, ctx);
    }

    /// Applies one packet body. `dirty` is the header's bit set.
    ///
    /// # Errors
    ///
    /// Malformed packets.
    fn apply_sync(
        &mut self,
        handle: Handle,
        dirty: u32,
        reader: &mut SyncPacketReader<'_>,
        ctx: &mut C,
    ) -> CoreResult<()>;

    /// Called once on the core context when the simulation half is gone.
    fn destroy(&mut self, handle: Handle, ctx: &mut C) {
        let _ = (handle, ctx);
    }

    /// Upcast for typed lookups.
    fn as_any(&self) -> &dyn Any;

    /// Upcast for typed lookups.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// =============================================================================
// SYNC BATCH
// =============================================================================

/// One object's packet inside a [`SyncBatch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncEntry {
    /// Object the packet belongs to.
    pub handle: Handle,
    /// Packet location in the batch allocator.
    pub slice: FrameSlice,
}

/// A frame's packets, together with the allocator that holds them.
#[derive(Debug)]
pub struct SyncBatch {
    /// Packet storage.
    pub alloc: FrameAlloc,
    /// Packets in build order.
    pub entries: Vec<SyncEntry>,
}

impl SyncBatch {
    /// True if no object was dirty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total packet bytes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.entries.iter().map(|e| e.slice.len()).sum()
    }
}

// =============================================================================
// SIMULATION REGISTRY
// =============================================================================

/// Owns the simulation halves and issues their handles.
pub struct SimObjectRegistry<C> {
    objects: HandleArena<Box<dyn SimObject<C>>>,
}

impl<C: 'static> Default for SimObjectRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> SimObjectRegistry<C> {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            objects: HandleArena::new(),
        }
    }

    /// Number of registered objects.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if no object is registered.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Registers an object and builds its core half.
    ///
    /// The object is marked fully dirty, so its first packet carries its
    /// whole state. The caller ships the returned core half to the core
    /// context.
    pub fn register(
        &mut self,
        object: Box<dyn SimObject<C>>,
    ) -> (Handle, Box<dyn CoreObject<C>>) {
        assert!(
            object.link().handle().is_none(),
            "Object registered twice!"
        );
        let core = object.create_core();
        let handle = self.objects.insert(object);
        if let Some(object) = self.objects.get_mut(handle) {
            object.link_mut().handle = Some(handle);
            object.mark_dirty(DirtyFlags::EVERYTHING);
        }
        debug!(%handle, "registered simulation object");
        (handle, core)
    }

    /// Removes an object. Unknown handles return `None`.
    pub fn unregister(&mut self, handle: Handle) -> Option<Box<dyn SimObject<C>>> {
        let mut object = self.objects.remove(handle)?;
        object.on_unregister();
        object.link_mut().handle = None;
        debug!(%handle, "unregistered simulation object");
        Some(object)
    }

    /// True if `handle` refers to a registered object.
    #[inline]
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.objects.contains(handle)
    }

    /// Typed access to a registered object.
    ///
    /// # Errors
    ///
    /// Unknown handle, or the object is not a `T`.
    pub fn get<T: 'static>(&self, handle: Handle) -> CoreResult<&T> {
        self.objects
            .get(handle)
            .ok_or(CoreError::UnknownObject(handle))?
            .as_any()
            .downcast_ref()
            .ok_or(CoreError::TypeMismatch {
                handle,
                expected: type_name::<T>(),
            })
    }

    /// Typed mutable access to a registered object.
    ///
    /// # Errors
    ///
    /// Unknown handle, or the object is not a `T`.
    pub fn get_mut<T: 'static>(&mut self, handle: Handle) -> CoreResult<&mut T> {
        self.objects
            .get_mut(handle)
            .ok_or(CoreError::UnknownObject(handle))?
            .as_any_mut()
            .downcast_mut()
            .ok_or(CoreError::TypeMismatch {
                handle,
                expected: type_name::<T>(),
            })
    }

    /// Builds packets for every dirty object into `alloc`.
    ///
    /// # Errors
    ///
    /// Propagates packet build errors.
    pub fn sync_to_core(&mut self, mut alloc: FrameAlloc) -> CoreResult<SyncBatch> {
        let mut entries = Vec::new();
        for (handle, object) in self.objects.iter_mut() {
            if let Some(slice) = object.build_sync_packet(&mut alloc)? {
                trace!(%handle, bytes = slice.len(), "built sync packet");
                entries.push(SyncEntry { handle, slice });
            }
        }

        let batch = SyncBatch { alloc, entries };
        if !batch.is_empty() {
            debug!(
                objects = batch.entries.len(),
                bytes = batch.byte_size(),
                "built sync batch"
            );
        }
        Ok(batch)
    }
}

// =============================================================================
// CORE REGISTRY
// =============================================================================

/// Owns the core halves. Every operation is core-context only.
pub struct CoreObjectRegistry<C> {
    objects: HandleArena<Box<dyn CoreObject<C>>>,
}

impl<C: 'static> Default for CoreObjectRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> CoreObjectRegistry<C> {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            objects: HandleArena::new(),
        }
    }

    /// Number of live core objects.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Initializes and stores a core half under its simulation handle.
    ///
    /// # Panics
    ///
    /// Off the core context, or if `handle` is already live.
    pub fn create(&mut self, handle: Handle, mut object: Box<dyn CoreObject<C>>, ctx: &mut C) {
        assert_core_context("CoreObjectRegistry::create");
        object.initialize(handle, ctx);
        self.objects.insert_at(handle, object);
    }

    /// Applies one sync packet to the object it belongs to.
    ///
    /// # Errors
    ///
    /// Unknown handle or malformed packet.
    ///
    /// # Panics
    ///
    /// Off the core context.
    pub fn apply(&mut self, handle: Handle, packet: &[u8], ctx: &mut C) -> CoreResult<()> {
        assert_core_context("CoreObjectRegistry::apply");
        let object = self
            .objects
            .get_mut(handle)
            .ok_or(CoreError::UnknownObject(handle))?;

        let mut reader = SyncPacketReader::new(packet);
        let dirty = reader.read_header()?;
        object.apply_sync(handle, dirty, &mut reader, ctx)?;
        reader.finish()
    }

    /// Applies every packet of a batch, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing packet.
    pub fn apply_batch(&mut self, batch: &SyncBatch, ctx: &mut C) -> CoreResult<()> {
        for entry in &batch.entries {
            self.apply(entry.handle, batch.alloc.bytes(entry.slice)?, ctx)?;
        }
        Ok(())
    }

    /// Destroys a core half. Unknown handles are a no-op returning false.
    ///
    /// # Panics
    ///
    /// Off the core context.
    pub fn destroy(&mut self, handle: Handle, ctx: &mut C) -> bool {
        assert_core_context("CoreObjectRegistry::destroy");
        match self.objects.remove(handle) {
            Some(mut object) => {
                object.destroy(handle, ctx);
                true
            }
            None => false,
        }
    }

    /// Destroys every core half.
    pub fn clear(&mut self, ctx: &mut C) {
        assert_core_context("CoreObjectRegistry::clear");
        for (handle, mut object) in self.objects.drain() {
            object.destroy(handle, ctx);
        }
    }

    /// Typed access to a core half.
    ///
    /// # Errors
    ///
    /// Unknown handle, or the object is not a `T`.
    pub fn get<T: 'static>(&self, handle: Handle) -> CoreResult<&T> {
        self.objects
            .get(handle)
            .ok_or(CoreError::UnknownObject(handle))?
            .as_any()
            .downcast_ref()
            .ok_or(CoreError::TypeMismatch {
                handle,
                expected: type_name::<T>(),
            })
    }

    /// Typed mutable access to a core half.
    ///
    /// # Errors
    ///
    /// Unknown handle, or the object is not a `T`.
    pub fn get_mut<T: 'static>(&mut self, handle: Handle) -> CoreResult<&mut T> {
        self.objects
            .get_mut(handle)
            .ok_or(CoreError::UnknownObject(handle))?
            .as_any_mut()
            .downcast_mut()
            .ok_or(CoreError::TypeMismatch {
                handle,
                expected: type_name::<T>(),
            })
    }
}
