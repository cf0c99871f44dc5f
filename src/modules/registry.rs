//! The module map and the registry service that guards it.
//!
//! [`ModuleMap`] has no locking of its own. It is only reachable through the
//! guards returned by [`ModuleRegistry::read`] and [`ModuleRegistry::write`],
//! so any function taking `&ModuleMap` already runs under the module lock.

use std::collections::btree_map::{self, BTreeMap};
use std::collections::HashMap;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::core::{AddressRange, ModuleRecord};
use crate::error::{ModuleError, Result};
use crate::hashing;

/// Loaded modules keyed by range start. Ranges never overlap.
#[derive(Debug, Default)]
pub struct ModuleMap {
    by_start: BTreeMap<u64, ModuleRecord>,
}

impl ModuleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Module whose range shares an address with `range`
    fn overlapping(&self, range: &AddressRange) -> Option<&ModuleRecord> {
        let before = self
            .by_start
            .range(..=range.start)
            .next_back()
            .map(|(_, m)| m);
        let after = self.by_start.range(range.start..).next().map(|(_, m)| m);

        before
            .into_iter()
            .chain(after)
            .find(|m| m.range.overlaps(range))
    }

    /// Insert `record`, rejecting empty ranges and any overlap with an
    /// existing module. A rejected record is handed back so the caller can
    /// drop it once the module lock is released.
    pub fn try_insert(&mut self, record: ModuleRecord) -> std::result::Result<(), Rejected> {
        let error = if record.range.is_empty() {
            ModuleError::InvalidArgument("module range is empty")
        } else if let Some(existing) = self.overlapping(&record.range) {
            ModuleError::DuplicateRange {
                start: record.range.start,
                end: record.range.end(),
                existing: existing.base(),
            }
        } else {
            self.by_start.insert(record.base(), record);
            return Ok(());
        };
        Err(Rejected {
            error,
            record: Box::new(record),
        })
    }

    /// [`try_insert`](Self::try_insert) that drops a rejected record on the spot
    pub fn insert(&mut self, record: ModuleRecord) -> Result<()> {
        self.try_insert(record).map_err(|rejected| rejected.error)
    }

    /// Remove the module containing `address`
    pub fn remove(&mut self, address: u64) -> Option<ModuleRecord> {
        let base = self.find_containing(address)?.base();
        self.by_start.remove(&base)
    }

    pub fn find_containing(&self, address: u64) -> Option<&ModuleRecord> {
        self.by_start
            .range(..=address)
            .next_back()
            .map(|(_, m)| m)
            .filter(|m| m.contains(address))
    }

    pub fn find_containing_mut(&mut self, address: u64) -> Option<&mut ModuleRecord> {
        self.by_start
            .range_mut(..=address)
            .next_back()
            .map(|(_, m)| m)
            .filter(|m| m.contains(address))
    }

    /// Modules in ascending base order
    pub fn iter(&self) -> btree_map::Values<'_, u64, ModuleRecord> {
        self.by_start.values()
    }

    pub fn len(&self) -> usize {
        self.by_start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_start.is_empty()
    }

    /// Take every record out of the map, in ascending base order
    pub fn drain(&mut self) -> Vec<ModuleRecord> {
        std::mem::take(&mut self.by_start).into_values().collect()
    }
}

/// A record [`ModuleMap::try_insert`] refused, with the reason
#[derive(Debug)]
pub struct Rejected {
    pub error: ModuleError,
    pub record: Box<ModuleRecord>,
}

impl<'a> IntoIterator for &'a ModuleMap {
    type Item = &'a ModuleRecord;
    type IntoIter = btree_map::Values<'a, u64, ModuleRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Process-wide module registry.
///
/// Holds two independent locks: one over the module map and one over the
/// name-hash cache. No code path holds both at once.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: RwLock<ModuleMap>,
    names: RwLock<HashMap<u64, String>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared access to the module map
    pub fn read(&self) -> RwLockReadGuard<'_, ModuleMap> {
        self.modules.read()
    }

    /// Exclusive access to the module map
    pub fn write(&self) -> RwLockWriteGuard<'_, ModuleMap> {
        self.modules.write()
    }

    /// Case-insensitive identity hash of `name`, zero when empty.
    ///
    /// Records the first spelling seen for each hash so that
    /// [`name_from_hash`](Self::name_from_hash) can answer later.
    pub fn hash_from_name(&self, name: &str) -> u64 {
        let hash = hashing::name_hash(name);
        if hash == 0 {
            return 0;
        }

        if self.names.read().contains_key(&hash) {
            return hash;
        }
        self.names
            .write()
            .entry(hash)
            .or_insert_with(|| name.to_string());
        hash
    }

    pub fn name_from_hash(&self, hash: u64) -> Option<String> {
        self.names.read().get(&hash).cloned()
    }

    pub fn cached_name_count(&self) -> usize {
        self.names.read().len()
    }

    pub fn clear_names(&self) {
        let mut names = self.names.write();
        debug!(count = names.len(), "clearing module name cache");
        names.clear();
    }
}
