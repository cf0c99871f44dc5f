//! Base relocation entries recorded per module.
//!
//! Each entry describes one location the OS loader patches when the image is
//! rebased. The debugger uses them to avoid treating patched bytes as code
//! changes and to show relocation targets in the disassembly.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::formats::pe::types::{
    BaseRelocation, IMAGE_REL_BASED_DIR64, IMAGE_REL_BASED_HIGH, IMAGE_REL_BASED_HIGHADJ,
    IMAGE_REL_BASED_HIGHLOW, IMAGE_REL_BASED_LOW,
};

/// PE base relocation kinds the registry keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelocationKind {
    /// High 16 bits of a 32-bit address
    High,
    /// Low 16 bits of a 32-bit address
    Low,
    /// Full 32-bit address
    HighLow,
    /// High 16 bits, adjusted for the sign of the low half
    HighAdj,
    /// Full 64-bit address
    Dir64,
}

impl RelocationKind {
    /// Map a raw type nibble; `None` for padding and unhandled types
    pub fn from_raw(kind: u8) -> Option<Self> {
        match kind {
            IMAGE_REL_BASED_HIGH => Some(Self::High),
            IMAGE_REL_BASED_LOW => Some(Self::Low),
            IMAGE_REL_BASED_HIGHLOW => Some(Self::HighLow),
            IMAGE_REL_BASED_HIGHADJ => Some(Self::HighAdj),
            IMAGE_REL_BASED_DIR64 => Some(Self::Dir64),
            _ => None,
        }
    }

    /// Number of bytes the loader patches
    pub fn width(self) -> u8 {
        match self {
            Self::High | Self::Low | Self::HighAdj => 2,
            Self::HighLow => 4,
            Self::Dir64 => 8,
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            Self::High => IMAGE_REL_BASED_HIGH,
            Self::Low => IMAGE_REL_BASED_LOW,
            Self::HighLow => IMAGE_REL_BASED_HIGHLOW,
            Self::HighAdj => IMAGE_REL_BASED_HIGHADJ,
            Self::Dir64 => IMAGE_REL_BASED_DIR64,
        }
    }
}

impl fmt::Display for RelocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::High => "HIGH",
            Self::Low => "LOW",
            Self::HighLow => "HIGHLOW",
            Self::HighAdj => "HIGHADJ",
            Self::Dir64 => "DIR64",
        };
        f.write_str(name)
    }
}

/// One relocation, relative to the module base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relocation {
    pub rva: u32,
    pub kind: RelocationKind,
    /// Patched width in bytes
    pub size: u8,
}

impl Relocation {
    pub fn new(rva: u32, kind: RelocationKind) -> Self {
        Self {
            rva,
            kind,
            size: kind.width(),
        }
    }

    /// Whether `rva` falls on one of the patched bytes
    pub fn contains(&self, rva: u64) -> bool {
        let start = u64::from(self.rva);
        rva >= start && rva < start + u64::from(self.size)
    }
}

impl TryFrom<BaseRelocation> for Relocation {
    type Error = u8;

    fn try_from(raw: BaseRelocation) -> Result<Self, Self::Error> {
        let kind = RelocationKind::from_raw(raw.kind).ok_or(raw.kind)?;
        Ok(Self {
            rva: raw.rva,
            kind,
            size: raw.size,
        })
    }
}
