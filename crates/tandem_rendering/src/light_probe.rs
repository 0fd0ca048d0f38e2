//! # Light Probe Volume
//!
//! A set of irradiance probes, each storing third-order SH lighting.
//!
//! ## Simulation half
//!
//! A sparse map `probe id → probe`. Ids come from a counter and are never
//! reused. Removal marks the probe `Removed`; the next packet reports it and
//! the entry is erased.
//!
//! ## Core half
//!
//! A compact record array:
//!
//! ```text
//!  index:   0     1     2     3     4     5
//!         ┌─────┬─────┬─────┬─────┬─────┬─────┐
//!         │ P0  │ P1  │ P4  │ P3  │Empty│Empty│
//!         └─────┴─────┴─────┴─────┴─────┴─────┘
//!         ◄──── active: [0, active_count) ────►◄ free tail ►
//!                 ▲
//!                 first_dirty_probe: everything before it is clean
//! ```
//!
//! - Removal empties a slot and swaps it with the last non-empty record, so
//!   active records always form a prefix.
//! - New probes reuse the first empty slot of the tail, or append.
//! - Each record keeps its coefficient buffer slot (`buffer_idx`) when it
//!   moves, so captured coefficients stay with their probe.
//! - Capture starts at `first_dirty_probe`, so a multi-frame capture job
//!   only revisits probes that are still dirty.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};

use tandem_core::{
    CoreLink, CoreObject, CoreResult, Handle, SimObject, SyncPacketReader, SyncPacketWriter,
};
use tandem_core::error::CoreError;
use tandem_core::sync::packet::packed_size;
use tandem_shared::{
    Aabb, Quaternion, ShCoefficients, Vec3, DEFAULT_PROBES_PER_STEP, IRRADIANCE_CUBEMAP_SIZE,
    MIN_COEFFICIENT_CAPACITY, MIN_PROBE_COUNT,
};
use tracing::{debug, trace, warn};

use crate::ibl::RenderBackend;
use crate::renderer::CoreRenderer;
use crate::resources::{BufferHandle, BufferUsage, GpuBufferDesc, TextureDesc, TextureHandle};
use crate::scheduler::TaskScheduler;
use crate::task::{RendererTask, TaskRef, TaskWork};

/// Volume position or rotation changed.
pub const DIRTY_TRANSFORM: u32 = 1 << 0;
/// Active flag changed.
pub const DIRTY_ACTIVE: u32 = 1 << 1;
/// Probes were added, moved, marked for capture or removed.
pub const DIRTY_PROBES: u32 = 1 << 2;

/// State of one probe record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ProbeState {
    /// Free slot (core side only).
    Empty = 0,
    /// Up to date.
    Clean = 1,
    /// Needs delivering (simulation side) or capturing (core side).
    Dirty = 2,
    /// Pending removal (simulation side only).
    Removed = 3,
}

impl ProbeState {
    fn decode(value: u32) -> CoreResult<Self> {
        match value {
            0 => Ok(Self::Empty),
            1 => Ok(Self::Clean),
            2 => Ok(Self::Dirty),
            3 => Ok(Self::Removed),
            _ => Err(CoreError::InvalidEnum {
                field: "ProbeState",
                value,
            }),
        }
    }
}

/// Serialized size of one dirty probe entry: id, position, state.
const DIRTY_ENTRY_SIZE: usize = packed_size::<u32>() + packed_size::<Vec3>() + packed_size::<u32>();

// =============================================================================
// SIMULATION HALF
// =============================================================================

/// One probe as the simulation side sees it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightProbe {
    /// Position relative to the volume.
    pub position: Vec3,
    /// Last coefficients read back from the core side.
    pub coefficients: ShCoefficients,
    state: ProbeState,
}

impl LightProbe {
    /// Sync state.
    #[must_use]
    pub const fn state(&self) -> ProbeState {
        self.state
    }
}

/// Simulation half of a light probe volume.
pub struct LightProbeVolume {
    link: CoreLink,
    position: Vec3,
    rotation: Quaternion,
    active: bool,
    probes: BTreeMap<u32, LightProbe>,
    next_probe_id: u32,
    probes_per_step: u32,
    render_task: Option<TaskRef>,
}

impl Default for LightProbeVolume {
    fn default() -> Self {
        Self::new()
    }
}

impl LightProbeVolume {
    /// Creates an active volume with no probes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            link: CoreLink::new(),
            position: Vec3::ZERO,
            rotation: Quaternion::IDENTITY,
            active: true,
            probes: BTreeMap::new(),
            next_probe_id: 0,
            probes_per_step: DEFAULT_PROBES_PER_STEP,
            render_task: None,
        }
    }

    /// Creates a volume with probes on a regular grid spanning `volume`.
    ///
    /// `density` is the number of cells per axis (minimum 1); probes sit on
    /// the cell corners, so there are `(density + 1)` probes per axis.
    #[must_use]
    pub fn from_grid(volume: Aabb, density: [u32; 3]) -> Self {
        let mut out = Self::new();
        let [nx, ny, nz] = density.map(|d| d.max(1));
        let size = volume.size();
        for z in 0..=nz {
            for y in 0..=ny {
                for x in 0..=nx {
                    let t = Vec3::new(
                        x as f32 / nx as f32,
                        y as f32 / ny as f32,
                        z as f32 / nz as f32,
                    );
                    out.add_probe(
                        volume.min + Vec3::new(size.x * t.x, size.y * t.y, size.z * t.z),
                    );
                }
            }
        }
        out
    }

    /// Sets how many probes a capture task renders per frame (0 = all).
    #[must_use]
    pub const fn with_probes_per_step(mut self, probes_per_step: u32) -> Self {
        self.probes_per_step = probes_per_step;
        self
    }

    /// Volume position.
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Moves the volume.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.link.mark_dirty(DIRTY_TRANSFORM);
    }

    /// Volume rotation.
    #[must_use]
    pub const fn rotation(&self) -> Quaternion {
        self.rotation
    }

    /// Rotates the volume.
    pub fn set_rotation(&mut self, rotation: Quaternion) {
        self.rotation = rotation;
        self.link.mark_dirty(DIRTY_TRANSFORM);
    }

    /// True if the volume contributes lighting.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Enables or disables the volume.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        self.link.mark_dirty(DIRTY_ACTIVE);
    }

    /// Adds a probe and returns its id. The probe starts dirty, so it is
    /// delivered with the next sync.
    pub fn add_probe(&mut self, position: Vec3) -> u32 {
        let id = self.next_probe_id;
        self.next_probe_id += 1;
        self.probes.insert(
            id,
            LightProbe {
                position,
                coefficients: ShCoefficients::default(),
                state: ProbeState::Dirty,
            },
        );
        self.link.mark_dirty(DIRTY_PROBES);
        id
    }

    /// Removes a probe.
    ///
    /// Returns `false` without changing anything if the id is unknown or
    /// the volume is already at [`MIN_PROBE_COUNT`] live probes.
    pub fn remove_probe(&mut self, id: u32) -> bool {
        let live = self.probe_count();
        let Some(probe) = self.probes.get_mut(&id) else {
            return false;
        };
        if probe.state == ProbeState::Removed || live <= MIN_PROBE_COUNT {
            return false;
        }
        probe.state = ProbeState::Removed;
        self.link.mark_dirty(DIRTY_PROBES);
        true
    }

    /// Moves a probe. It is recaptured at the new position.
    pub fn set_probe_position(&mut self, id: u32, position: Vec3) -> bool {
        match self.live_probe_mut(id) {
            Some(probe) => {
                probe.position = position;
                probe.state = ProbeState::Dirty;
                self.link.mark_dirty(DIRTY_PROBES);
                true
            }
            None => false,
        }
    }

    /// Position of a live probe.
    #[must_use]
    pub fn probe_position(&self, id: u32) -> Option<Vec3> {
        self.live_probe(id).map(|p| p.position)
    }

    /// Last read-back coefficients of a live probe.
    #[must_use]
    pub fn probe_coefficients(&self, id: u32) -> Option<ShCoefficients> {
        self.live_probe(id).map(|p| p.coefficients)
    }

    /// A live probe.
    #[must_use]
    pub fn probe(&self, id: u32) -> Option<&LightProbe> {
        self.live_probe(id)
    }

    /// Number of live (not removed) probes.
    #[must_use]
    pub fn probe_count(&self) -> usize {
        self.probes
            .values()
            .filter(|p| p.state != ProbeState::Removed)
            .count()
    }

    /// Ids of live probes, ascending.
    pub fn probe_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.probes
            .iter()
            .filter(|(_, p)| p.state != ProbeState::Removed)
            .map(|(id, _)| *id)
    }

    /// The in-flight capture task, if any.
    #[must_use]
    pub fn render_task(&self) -> Option<&TaskRef> {
        self.render_task.as_ref()
    }

    /// Marks one probe for capture and (re)starts the capture task.
    ///
    /// Returns `None` for unknown ids.
    pub fn render_probe(&mut self, id: u32, scheduler: &TaskScheduler) -> Option<TaskRef> {
        let probe = self.live_probe_mut(id)?;
        probe.state = ProbeState::Dirty;
        self.link.mark_dirty(DIRTY_PROBES);
        Some(self.run_render_task(scheduler))
    }

    /// Marks every probe for capture and (re)starts the capture task.
    pub fn render_probes(&mut self, scheduler: &TaskScheduler) -> TaskRef {
        for probe in self.probes.values_mut() {
            if probe.state == ProbeState::Clean {
                probe.state = ProbeState::Dirty;
            }
        }
        self.link.mark_dirty(DIRTY_PROBES);
        self.run_render_task(scheduler)
    }

    /// Stores read-back coefficients. Unknown ids are skipped. Returns the
    /// number of probes updated.
    pub fn apply_coefficients(&mut self, coefficients: &[(u32, ShCoefficients)]) -> usize {
        let mut updated = 0;
        for (id, value) in coefficients {
            if let Some(probe) = self.probes.get_mut(id) {
                probe.coefficients = *value;
                updated += 1;
            }
        }
        updated
    }

    /// Replaces the capture task. A task already in flight is canceled; it
    /// may have been about to render probes that just moved.
    fn run_render_task(&mut self, scheduler: &TaskScheduler) -> TaskRef {
        let Some(volume) = self.link.handle() else {
            panic!("Light probe volume rendered before registration!");
        };
        if let Some(previous) = self.render_task.take() {
            previous.cancel();
        }

        let task = RendererTask::new(
            "RenderLightProbes",
            TaskWork::RenderLightProbes {
                volume,
                max_per_step: self.probes_per_step,
            },
        );
        scheduler.schedule(&task);
        self.render_task = Some(std::sync::Arc::clone(&task));
        task
    }

    fn live_probe(&self, id: u32) -> Option<&LightProbe> {
        self.probes
            .get(&id)
            .filter(|p| p.state != ProbeState::Removed)
    }

    fn live_probe_mut(&mut self, id: u32) -> Option<&mut LightProbe> {
        self.probes
            .get_mut(&id)
            .filter(|p| p.state != ProbeState::Removed)
    }

    fn pending_counts(&self) -> (usize, usize) {
        self.probes.values().fold((0, 0), |(dirty, removed), p| match p.state {
            ProbeState::Dirty => (dirty + 1, removed),
            ProbeState::Removed => (dirty, removed + 1),
            ProbeState::Clean | ProbeState::Empty => (dirty, removed),
        })
    }
}

impl SimObject<CoreRenderer> for LightProbeVolume {
    fn link(&self) -> &CoreLink {
        &self.link
    }

    fn link_mut(&mut self) -> &mut CoreLink {
        &mut self.link
    }

    fn create_core(&self) -> Box<dyn CoreObject<CoreRenderer>> {
        Box::new(CoreLightProbeVolume::new())
    }

    fn sync_size(&self, dirty: u32) -> usize {
        let mut size = 0;
        if dirty & DIRTY_TRANSFORM != 0 {
            size += packed_size::<Vec3>() + packed_size::<Quaternion>();
        }
        if dirty & DIRTY_ACTIVE != 0 {
            size += packed_size::<u8>();
        }
        if dirty & DIRTY_PROBES != 0 {
            let (num_dirty, num_removed) = self.pending_counts();
            size += 2 * packed_size::<u32>()
                + num_dirty * DIRTY_ENTRY_SIZE
                + num_removed * packed_size::<u32>();
        }
        size
    }

    fn write_sync(&mut self, dirty: u32, writer: &mut SyncPacketWriter<'_>) {
        if dirty & DIRTY_TRANSFORM != 0 {
            writer.write(&self.position);
            writer.write(&self.rotation);
        }
        if dirty & DIRTY_ACTIVE != 0 {
            writer.write_bool(self.active);
        }
        if dirty & DIRTY_PROBES == 0 {
            return;
        }

        let (num_dirty, num_removed) = self.pending_counts();
        writer.write(&(num_dirty as u32));
        writer.write(&(num_removed as u32));

        for (id, probe) in &mut self.probes {
            if probe.state == ProbeState::Dirty {
                writer.write(id);
                writer.write(&probe.position);
                writer.write(&(probe.state as u32));
                probe.state = ProbeState::Clean;
            }
        }

        let mut removed = Vec::with_capacity(num_removed);
        for (id, probe) in &self.probes {
            if probe.state == ProbeState::Removed {
                writer.write(id);
                removed.push(*id);
            }
        }
        for id in removed {
            self.probes.remove(&id);
        }
        trace!(num_dirty, num_removed, "light probe volume packet");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn on_unregister(&mut self) {
        if let Some(task) = self.render_task.take() {
            task.cancel();
        }
    }
}

// =============================================================================
// CORE HALF
// =============================================================================

#[derive(Clone, Copy, Debug)]
struct ProbeRecord {
    id: u32,
    position: Vec3,
    buffer_idx: u32,
    state: ProbeState,
}

/// Core half of a light probe volume.
#[derive(Debug)]
pub struct CoreLightProbeVolume {
    position: Vec3,
    rotation: Quaternion,
    active: bool,
    records: Vec<ProbeRecord>,
    index_of: HashMap<u32, usize>,
    first_dirty_probe: usize,
    /// Records in `Dirty` state.
    dirty_probes: usize,
    coefficients: Option<BufferHandle>,
    coefficient_capacity: u32,
    positions: Option<BufferHandle>,
    position_capacity: u32,
    cubemap: Option<TextureHandle>,
    probes_rendered: u64,
}

impl Default for CoreLightProbeVolume {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreLightProbeVolume {
    /// Creates an inactive, empty mirror. The first packet fills it.
    #[must_use]
    pub fn new() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quaternion::IDENTITY,
            active: false,
            records: Vec::new(),
            index_of: HashMap::new(),
            first_dirty_probe: 0,
            dirty_probes: 0,
            coefficients: None,
            coefficient_capacity: 0,
            positions: None,
            position_capacity: 0,
            cubemap: None,
            probes_rendered: 0,
        }
    }

    /// Volume position.
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Volume rotation.
    #[must_use]
    pub const fn rotation(&self) -> Quaternion {
        self.rotation
    }

    /// True if active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Number of live probes, equal to the length of the active prefix.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.index_of.len()
    }

    /// Total records, active and empty.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Probe ids of the active prefix, in record order.
    #[must_use]
    pub fn active_ids(&self) -> Vec<u32> {
        self.records[..self.active_count()]
            .iter()
            .map(|r| r.id)
            .collect()
    }

    /// Record index of a probe.
    #[must_use]
    pub fn index_of(&self, id: u32) -> Option<usize> {
        self.index_of.get(&id).copied()
    }

    /// State of the record at `index`.
    #[must_use]
    pub fn state_at(&self, index: usize) -> Option<ProbeState> {
        self.records.get(index).map(|r| r.state)
    }

    /// Position of a live probe.
    #[must_use]
    pub fn probe_position(&self, id: u32) -> Option<Vec3> {
        self.index_of(id).map(|i| self.records[i].position)
    }

    /// Capture cursor.
    #[must_use]
    pub const fn first_dirty_probe(&self) -> usize {
        self.first_dirty_probe
    }

    /// Live probes still waiting for capture.
    #[must_use]
    pub const fn dirty_count(&self) -> usize {
        self.dirty_probes
    }

    /// Coefficient buffer capacity, in probes.
    #[must_use]
    pub const fn coefficient_capacity(&self) -> u32 {
        self.coefficient_capacity
    }

    /// Probes captured over the volume's lifetime.
    #[must_use]
    pub const fn probes_rendered(&self) -> u64 {
        self.probes_rendered
    }

    /// True if active records form a gap-free prefix followed only by
    /// empty records, and the id map agrees with the records.
    #[must_use]
    pub fn is_compact(&self) -> bool {
        let active = self.active_count();
        self.records[..active.min(self.records.len())]
            .iter()
            .all(|r| r.state != ProbeState::Empty)
            && self.records[active.min(self.records.len())..]
                .iter()
                .all(|r| r.state == ProbeState::Empty)
            && self
                .index_of
                .iter()
                .all(|(id, &i)| self.records.get(i).is_some_and(|r| r.id == *id))
    }

    fn apply_probe_changes(&mut self, reader: &mut SyncPacketReader<'_>) -> CoreResult<()> {
        let num_dirty: u32 = reader.read()?;
        let num_removed: u32 = reader.read()?;

        for _ in 0..num_dirty {
            let id: u32 = reader.read()?;
            let position: Vec3 = reader.read()?;
            let state = ProbeState::decode(reader.read()?)?;
            if state != ProbeState::Dirty {
                return Err(CoreError::InvalidEnum {
                    field: "dirty probe state",
                    value: state as u32,
                });
            }
            self.upsert_probe(id, position);
        }

        for _ in 0..num_removed {
            let id: u32 = reader.read()?;
            self.remove_probe(id);
        }

        debug_assert!(self.is_compact(), "probe records lost compaction");
        Ok(())
    }

    fn upsert_probe(&mut self, id: u32, position: Vec3) {
        if let Some(&index) = self.index_of.get(&id) {
            let record = &mut self.records[index];
            record.position = position;
            if record.state != ProbeState::Dirty {
                record.state = ProbeState::Dirty;
                self.dirty_probes += 1;
            }
            self.first_dirty_probe = self.first_dirty_probe.min(index);
            return;
        }

        // Empty slots only ever sit behind the active prefix.
        let empty_start = self.index_of.len();
        let index = match self.records[empty_start..]
            .iter()
            .position(|r| r.state == ProbeState::Empty)
        {
            Some(offset) => {
                let index = empty_start + offset;
                let record = &mut self.records[index];
                record.id = id;
                record.position = position;
                record.state = ProbeState::Dirty;
                index
            }
            None => {
                let index = self.records.len();
                self.records.push(ProbeRecord {
                    id,
                    position,
                    buffer_idx: index as u32,
                    state: ProbeState::Dirty,
                });
                index
            }
        };
        self.index_of.insert(id, index);
        self.dirty_probes += 1;
        self.first_dirty_probe = self.first_dirty_probe.min(index);
    }

    fn remove_probe(&mut self, id: u32) {
        let Some(index) = self.index_of.remove(&id) else {
            return;
        };
        if self.records[index].state == ProbeState::Dirty {
            self.dirty_probes -= 1;
        }
        self.records[index].state = ProbeState::Empty;

        // Swap with the last non-empty record to keep the prefix packed.
        let last = (index + 1..self.records.len())
            .rev()
            .find(|&i| self.records[i].state != ProbeState::Empty);
        if let Some(last) = last {
            self.records.swap(index, last);
            let moved = self.records[index];
            self.index_of.insert(moved.id, index);
            if moved.state == ProbeState::Dirty {
                self.first_dirty_probe = self.first_dirty_probe.min(index);
            }
        }
    }

    /// Captures and filters up to `max_probes` dirty probes (0 = all),
    /// starting at the capture cursor. Returns `true` once no dirty probe
    /// remains.
    pub fn render_probes(&mut self, max_probes: u32, backend: &mut dyn RenderBackend) -> bool {
        let needed = self.records.len() as u32;
        if needed > self.coefficient_capacity {
            self.resize_coefficient_buffer(backend, MIN_COEFFICIENT_CAPACITY.max(needed * 2));
        }
        let Some(coefficients) = self.coefficients else {
            warn!("light probe volume has no coefficient buffer, skipping capture");
            return true;
        };
        let cubemap = *self.cubemap.get_or_insert_with(|| {
            backend.create_texture(&TextureDesc::cubemap(IRRADIANCE_CUBEMAP_SIZE, 1))
        });

        let mut rendered = 0;
        while self.first_dirty_probe < self.records.len() {
            let record = &mut self.records[self.first_dirty_probe];
            self.first_dirty_probe += 1;
            if record.state != ProbeState::Dirty {
                continue;
            }

            if backend.capture_scene_cubemap(cubemap, record.position) {
                backend.filter_irradiance(cubemap, coefficients, record.buffer_idx);
            }
            record.state = ProbeState::Clean;
            self.dirty_probes -= 1;
            rendered += 1;
            trace!(probe = record.id, "light probe captured");

            if max_probes != 0 && rendered >= max_probes {
                break;
            }
        }

        self.probes_rendered += u64::from(rendered);
        self.dirty_probes == 0
    }

    /// Coefficients of every live probe, as `(probe id, coefficients)`.
    #[must_use]
    pub fn read_coefficients(&self, backend: &dyn RenderBackend) -> Vec<(u32, ShCoefficients)> {
        let Some(buffer) = self.coefficients else {
            return Vec::new();
        };
        let readable = (self.records.len() as u32).min(self.coefficient_capacity) as usize;
        let Some(bytes) = backend.read_buffer(buffer, 0, readable * ShCoefficients::SIZE) else {
            warn!("coefficient readback failed");
            return Vec::new();
        };

        self.records[..self.active_count()]
            .iter()
            .map(|r| {
                let offset = r.buffer_idx as usize * ShCoefficients::SIZE;
                let value = bytes
                    .get(offset..offset + ShCoefficients::SIZE)
                    .map(bytemuck::pod_read_unaligned)
                    .unwrap_or_default();
                (r.id, value)
            })
            .collect()
    }

    /// Uploads positions of the active prefix to the GPU. Returns the number
    /// of probes uploaded.
    pub fn upload_positions(&mut self, backend: &mut dyn RenderBackend) -> usize {
        let active = self.active_count();
        if active as u32 > self.position_capacity {
            if let Some(old) = self.positions.take() {
                backend.destroy_buffer(old);
            }
            let capacity = MIN_COEFFICIENT_CAPACITY.max(active as u32 * 2);
            self.positions = Some(backend.create_buffer(&GpuBufferDesc::structured::<Vec3>(
                capacity,
                BufferUsage::Dynamic,
            )));
            self.position_capacity = capacity;
        }
        let Some(buffer) = self.positions else {
            return 0;
        };

        let positions: Vec<Vec3> = self.records[..active].iter().map(|r| r.position).collect();
        if backend.write_buffer(buffer, 0, bytemuck::cast_slice(&positions)) {
            active
        } else {
            0
        }
    }

    fn resize_coefficient_buffer(&mut self, backend: &mut dyn RenderBackend, count: u32) {
        let buffer = backend.create_buffer(&GpuBufferDesc::structured::<ShCoefficients>(
            count,
            BufferUsage::Static,
        ));
        if let Some(old) = self.coefficients.take() {
            let len = self.coefficient_capacity as usize * ShCoefficients::SIZE;
            backend.copy_buffer(old, buffer, len);
            backend.destroy_buffer(old);
        }
        debug!(from = self.coefficient_capacity, to = count, "coefficient buffer resized");
        self.coefficients = Some(buffer);
        self.coefficient_capacity = count;
    }
}

impl CoreObject<CoreRenderer> for CoreLightProbeVolume {
    fn initialize(&mut self, _handle: Handle, ctx: &mut CoreRenderer) {
        self.resize_coefficient_buffer(ctx.backend_mut(), MIN_COEFFICIENT_CAPACITY);
    }

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
            self.rotation = reader.read()?;
        }
        if dirty & DIRTY_ACTIVE != 0 {
            self.active = reader.read_bool()?;
        }
        if dirty & DIRTY_PROBES != 0 {
            self.apply_probe_changes(reader)?;
        }

        let scene = ctx.scene_mut();
        match (was_active, self.active) {
            (false, true) => scene.notify_light_probe_volume_added(handle),
            (true, false) => scene.notify_light_probe_volume_removed(handle),
            (true, true) => scene.notify_light_probe_volume_updated(handle, false),
            (false, false) => {}
        }
        Ok(())
    }

    fn destroy(&mut self, handle: Handle, ctx: &mut CoreRenderer) {
        if self.active {
            ctx.scene_mut().notify_light_probe_volume_removed(handle);
        }
        let backend = ctx.backend_mut();
        for buffer in [self.coefficients.take(), self.positions.take()].into_iter().flatten() {
            backend.destroy_buffer(buffer);
        }
        if let Some(cubemap) = self.cubemap.take() {
            backend.destroy_texture(cubemap);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
