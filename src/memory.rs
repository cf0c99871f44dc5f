//! Interfaces to the debugged process and to consumers of loader events.
//!
//! These traits are implemented by the debugger core; the registry only
//! calls them.

use bytes::Bytes;

use crate::core::ModuleInfo;

/// Read access to the target's address space
pub trait TargetMemory: Send + Sync {
    /// Copy `len` bytes starting at `address`. `None` when any part of the
    /// span is unreadable.
    fn read_bytes(&self, address: u64, len: usize) -> Option<Bytes>;

    fn is_readable(&self, address: u64) -> bool;
}

/// Receives labels the loader synthesizes for virtual modules
pub trait LabelSink: Send + Sync {
    fn set_label(&self, address: u64, text: &str);
}

/// Notified after the module list changes
pub trait ModuleListObserver: Send + Sync {
    fn modules_changed(&self, event: &ModuleEvent);
}

/// What changed in the module list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleEvent {
    Loaded(ModuleInfo),
    Unloaded { base: u64, name: String },
    Cleared,
}

/// Target that has no readable memory
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMemory;

impl TargetMemory for NoMemory {
    fn read_bytes(&self, _address: u64, _len: usize) -> Option<Bytes> {
        None
    }

    fn is_readable(&self, _address: u64) -> bool {
        false
    }
}

/// Label sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLabels;

impl LabelSink for NoLabels {
    fn set_label(&self, _address: u64, _text: &str) {}
}

/// Sparse memory image assembled from byte regions, mainly for tests and
/// offline replay of a captured process.
#[derive(Debug, Default, Clone)]
pub struct MemoryImage {
    regions: std::collections::BTreeMap<u64, Bytes>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `data` at `address`, replacing a region starting there
    pub fn map(&mut self, address: u64, data: impl Into<Bytes>) {
        self.regions.insert(address, data.into());
    }

    fn region_for(&self, address: u64) -> Option<(u64, &Bytes)> {
        let (&start, bytes) = self.regions.range(..=address).next_back()?;
        let offset = address - start;
        (offset < bytes.len() as u64).then_some((start, bytes))
    }
}

impl TargetMemory for MemoryImage {
    fn read_bytes(&self, address: u64, len: usize) -> Option<Bytes> {
        let (start, bytes) = self.region_for(address)?;
        let offset = usize::try_from(address - start).ok()?;
        let end = offset.checked_add(len)?;
        (end <= bytes.len()).then(|| bytes.slice(offset..end))
    }

    fn is_readable(&self, address: u64) -> bool {
        self.region_for(address).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_image_reads() {
        let mut mem = MemoryImage::new();
        mem.map(0x1000, vec![1u8, 2, 3, 4]);
        mem.map(0x2000, Bytes::from_static(b"\x90\xC3"));

        assert_eq!(mem.read_bytes(0x1001, 2).as_deref(), Some(&[2u8, 3][..]));
        assert_eq!(mem.read_bytes(0x1000, 4).map(|b| b.len()), Some(4));
        assert!(mem.read_bytes(0x1002, 4).is_none());
        assert!(mem.read_bytes(0x0FFF, 1).is_none());
        assert!(mem.is_readable(0x2001));
        assert!(!mem.is_readable(0x2002));
    }

    #[test]
    fn test_no_memory() {
        assert!(NoMemory.read_bytes(0x1000, 1).is_none());
        assert!(!NoMemory.is_readable(0x1000));
        NoLabels.set_label(0x1000, "ignored");
    }
}
