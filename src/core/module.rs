//! Module records: everything the debugger knows about one loaded image.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::address_range::AddressRange;
use crate::core::relocation::Relocation;
use crate::hashing;
use crate::io::FileMapping;
use crate::symbols::SymbolSource;

/// Party a module belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TrustClass {
    #[default]
    User,
    System,
}

impl TrustClass {
    /// Numeric value used by the expression layer
    pub fn as_u64(self) -> u64 {
        match self {
            Self::User => 0,
            Self::System => 1,
        }
    }
}

impl fmt::Display for TrustClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::System => f.write_str("system"),
        }
    }
}

/// One section of a loaded image, in absolute addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSection {
    pub name: String,
    pub address: u64,
    pub size: u64,
}

impl ModuleSection {
    pub fn contains(&self, address: u64) -> bool {
        AddressRange::new(self.address, self.size).contains(address)
    }
}

/// An import slot resolved by the debugger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleImport {
    /// Address of the import slot
    pub address: u64,
    pub ordinal: Option<u32>,
    pub name: Option<String>,
}

/// An export parsed from the image's export directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleExport {
    pub name: Option<String>,
    pub ordinal: u32,
    /// Absolute address; zero for forwarders
    pub address: u64,
    pub forwarder: Option<String>,
}

/// Everything recorded for one loaded image.
///
/// Owns its symbol source and, for file-backed modules, the file mapping.
/// Fields drop in declaration order, so an in-flight symbol load is
/// cancelled before the mapping is unmapped.
#[derive(Debug, Default)]
pub struct ModuleRecord {
    pub range: AddressRange,
    /// Lowercase file name without extension
    pub name: String,
    /// Lowercase extension including the dot, empty when absent
    pub extension: String,
    /// Full path as reported by the target
    pub path: String,
    /// Identity hash of `name + extension`
    pub hash: u64,
    pub trust: TrustClass,
    /// Absolute entry point, zero for DLLs that declare none
    pub entry: u64,
    pub sections: Vec<ModuleSection>,
    pub imports: BTreeMap<u64, ModuleImport>,
    pub exports: Vec<ModuleExport>,
    /// Sorted ascending by RVA
    pub relocations: Vec<Relocation>,
    pub tls_callbacks: Vec<u64>,
    pub symbol_signature: String,
    pub symbol_file: String,
    pub symbols: SymbolSource,
    pub mapping: Option<FileMapping>,
    pub is_virtual: bool,
}

impl ModuleRecord {
    pub fn base(&self) -> u64 {
        self.range.start
    }

    pub fn size(&self) -> u64 {
        self.range.size
    }

    pub fn contains(&self, address: u64) -> bool {
        self.range.contains(address)
    }

    /// `name` followed by `extension`
    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, self.extension)
    }

    pub fn section_at(&self, address: u64) -> Option<&ModuleSection> {
        self.sections.iter().find(|s| s.contains(address))
    }

    /// Record an import slot. Rejects a zero address or one already present.
    pub fn add_import(&mut self, import: ModuleImport) -> bool {
        if import.address == 0 || self.imports.contains_key(&import.address) {
            return false;
        }
        self.imports.insert(import.address, import);
        true
    }

    fn rva_of(&self, address: u64) -> Option<u64> {
        address.checked_sub(self.base())
    }

    /// Index of the last relocation whose RVA is at or below `rva`
    fn last_relocation_at_or_below(&self, rva: u64) -> Option<usize> {
        let upper = self
            .relocations
            .partition_point(|r| u64::from(r.rva) <= rva);
        upper.checked_sub(1)
    }

    /// Relocation whose patched bytes cover `address`
    pub fn relocation_at(&self, address: u64) -> Option<Relocation> {
        let rva = self.rva_of(address)?;
        let idx = self.last_relocation_at_or_below(rva)?;
        let reloc = self.relocations.get(idx)?;
        reloc.contains(rva).then_some(*reloc)
    }

    /// Relocations starting inside `[address, address + size)`
    pub fn relocations_in_range(&self, address: u64, size: u64) -> Vec<Relocation> {
        let Some(start) = self.rva_of(address) else {
            return Vec::new();
        };
        let end = start.saturating_add(size);
        let from = self.last_relocation_at_or_below(start).unwrap_or(0);

        self.relocations[from..]
            .iter()
            .take_while(|r| u64::from(r.rva) < end)
            .filter(|r| u64::from(r.rva) >= start)
            .copied()
            .collect()
    }

    /// BLAKE3 of the backing file folded to 64 bits, zero without a mapping
    pub fn content_hash(&self) -> u64 {
        self.mapping
            .as_ref()
            .map_or(0, |m| hashing::content_hash(m.bytes()))
    }

    /// Drop owned resources: cancel symbol loading, unmap the file
    pub fn release(&mut self) {
        self.symbols.release();
        self.mapping = None;
    }

    /// Snapshot without owned resources
    pub fn info(&self) -> ModuleInfo {
        ModuleInfo {
            base: self.base(),
            size: self.size(),
            entry: self.entry,
            name: self.name.clone(),
            extension: self.extension.clone(),
            path: self.path.clone(),
            hash: self.hash,
            trust: self.trust,
            sections: self.sections.clone(),
            imports: self.imports.values().cloned().collect(),
            exports: self.exports.clone(),
            relocation_count: self.relocations.len(),
            tls_callbacks: self.tls_callbacks.clone(),
            symbol_signature: self.symbol_signature.clone(),
            symbol_file: self.symbol_file.clone(),
            symbol_provider: self.symbols.provider_name().to_string(),
            symbols_loading: self.symbols.is_loading(),
            is_virtual: self.is_virtual,
        }
    }
}

/// Clonable, serializable view of a [`ModuleRecord`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub base: u64,
    pub size: u64,
    pub entry: u64,
    pub name: String,
    pub extension: String,
    pub path: String,
    pub hash: u64,
    pub trust: TrustClass,
    pub sections: Vec<ModuleSection>,
    pub imports: Vec<ModuleImport>,
    pub exports: Vec<ModuleExport>,
    pub relocation_count: usize,
    pub tls_callbacks: Vec<u64>,
    pub symbol_signature: String,
    pub symbol_file: String,
    pub symbol_provider: String,
    pub symbols_loading: bool,
    pub is_virtual: bool,
}
