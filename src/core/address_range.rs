//! Half-open address ranges owned by loaded modules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open region `[start, start + size)` of the target's address space.
///
/// The end is computed with saturation, so a range touching the top of the
/// address space simply stops at `u64::MAX`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    /// The starting address of the range (inclusive)
    pub start: u64,
    /// The size of the range in bytes
    pub size: u64,
}

impl AddressRange {
    pub fn new(start: u64, size: u64) -> Self {
        Self { start, size }
    }

    /// The end address of the range (exclusive)
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Check if this range contains the given address.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end()
    }

    /// Check if this range shares at least one address with `other`.
    pub fn overlaps(&self, other: &AddressRange) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start < other.end()
            && other.start < self.end()
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end())
    }
}
