//! Spherical harmonic irradiance coefficients.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Number of SH basis functions for a third-order (L2) expansion.
pub const SH_BASIS_COUNT: usize = 9;

/// Third-order SH irradiance of one light probe, one set per color channel.
///
/// Stored as one GPU buffer element; the layout matches what the irradiance
/// filter writes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct ShCoefficients {
    /// Red channel coefficients
    pub r: [f32; SH_BASIS_COUNT],
    /// Green channel coefficients
    pub g: [f32; SH_BASIS_COUNT],
    /// Blue channel coefficients
    pub b: [f32; SH_BASIS_COUNT],
}

impl ShCoefficients {
    /// Size of one coefficient block in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Coefficients of a constant (ambient-only) radiance field.
    #[must_use]
    pub fn ambient(r: f32, g: f32, b: f32) -> Self {
        let mut out = Self::default();
        out.r[0] = r;
        out.g[0] = g;
        out.b[0] = b;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coefficient_block_size() {
        assert_eq!(ShCoefficients::SIZE, 3 * SH_BASIS_COUNT * 4);
    }

    #[test]
    fn test_ambient_sets_dc_term_only() {
        let c = ShCoefficients::ambient(1.0, 0.5, 0.25);
        assert_eq!(c.r[0], 1.0);
        assert_eq!(c.g[0], 0.5);
        assert_eq!(c.b[0], 0.25);
        assert!(c.r[1..].iter().all(|v| *v == 0.0));
    }
}
