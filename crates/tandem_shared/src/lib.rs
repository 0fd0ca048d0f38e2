//! # TANDEM Shared
//!
//! Plain data used by both the simulation context and the core context.
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on:
//! - threading primitives
//! - GPU resource handles
//!
//! Everything here is `Pod` where it crosses the sync packet boundary, so the
//! packet codec can copy it byte-for-byte.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod math;
pub mod sh;

pub use constants::{
    DEFAULT_FPS_LIMIT, DEFAULT_PROBES_PER_STEP, DEFAULT_SPIN_THRESHOLD_US,
    IRRADIANCE_CUBEMAP_SIZE, MIN_COEFFICIENT_CAPACITY, MIN_PROBE_COUNT, REFLECTION_CUBEMAP_SIZE,
};
pub use math::{Aabb, Quaternion, Vec3};
pub use sh::ShCoefficients;
