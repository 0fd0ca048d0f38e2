//! Dirty bit accumulation.

use std::sync::atomic::{AtomicU32, Ordering};

/// Bits marking which fields of a simulation object changed since the last
/// sync.
///
/// `take` reads and clears in one atomic step, so a bit set concurrently
/// with a packet build lands in either this packet or the next, never both
/// and never neither.
#[derive(Debug, Default)]
pub struct DirtyFlags {
    bits: AtomicU32,
}

impl DirtyFlags {
    /// All bits set. Objects read it as "send everything".
    pub const EVERYTHING: u32 = u32::MAX;

    /// Creates clean flags.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    /// ORs `bits` into the pending set.
    #[inline]
    pub fn mark(&self, bits: u32) {
        self.bits.fetch_or(bits, Ordering::AcqRel);
    }

    /// Returns the pending set and clears it.
    #[inline]
    pub fn take(&self) -> u32 {
        self.bits.swap(0, Ordering::AcqRel)
    }

    /// Pending set without clearing.
    #[inline]
    #[must_use]
    pub fn peek(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    /// True if any bit is pending.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.peek() != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_returns_union_and_clears() {
        let flags = DirtyFlags::new();
        flags.mark(0b001);
        flags.mark(0b100);
        flags.mark(0b001);
        assert_eq!(flags.take(), 0b101);
        assert!(!flags.is_dirty());
        assert_eq!(flags.take(), 0);
    }
}
