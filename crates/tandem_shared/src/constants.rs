//! # Engine Constants
//!
//! Values that other crates agree on. Changing one of these changes the
//! behaviour of both contexts, so they live in one place.

// =============================================================================
// LIGHT PROBES
// =============================================================================

/// Minimum number of live probes a light probe volume keeps.
///
/// Probe lighting is interpolated across a tetrahedral mesh built from the
/// probe positions. A tetrahedron needs four vertices, so a volume with fewer
/// than four probes cannot produce any interpolation cell. Removal requests
/// that would go below this count are ignored.
pub const MIN_PROBE_COUNT: usize = 4;

/// Smallest capacity (in probes) of a volume's coefficient buffer.
pub const MIN_COEFFICIENT_CAPACITY: u32 = 32;

/// Default number of probes a single capture task step renders.
pub const DEFAULT_PROBES_PER_STEP: u32 = 3;

// =============================================================================
// IMAGE BASED LIGHTING
// =============================================================================

/// Face size of the cubemap captured for irradiance filtering.
pub const IRRADIANCE_CUBEMAP_SIZE: u32 = 32;

/// Face size of captured/filtered reflection cubemaps.
pub const REFLECTION_CUBEMAP_SIZE: u32 = 256;

// =============================================================================
// FRAME PACING
// =============================================================================

/// Default frame rate limit (frames per second).
pub const DEFAULT_FPS_LIMIT: u32 = 60;

/// Remaining frame time (microseconds) above which the pacer sleeps.
///
/// Below this the pacer spins: OS sleep granularity is too coarse and would
/// overshoot the deadline.
pub const DEFAULT_SPIN_THRESHOLD_US: u64 = 2_000;
