//! Address and name lookups over the registry.
//!
//! Every reader takes the shared module lock for the duration of one call
//! and returns owned data. `set_trust_class` and `add_import` take the
//! exclusive lock. A missing module is an ordinary `None`, not an error.

use crate::core::{
    ModuleExport, ModuleImport, ModuleInfo, ModuleRecord, ModuleSection, Relocation, TrustClass,
};
use crate::modules::registry::{ModuleMap, ModuleRegistry};

/// Module matching `name` under the loader's name rules.
///
/// Stored names are already lowercase, so the query gets the same Unicode
/// lowercasing and is compared against `name + extension` first. Failing
/// that, the first module (in base order) whose extension-less name matches
/// is returned.
pub fn find_by_name<'a>(modules: &'a ModuleMap, name: &str) -> Option<&'a ModuleRecord> {
    if name.is_empty() {
        return None;
    }
    let query = name.to_lowercase();

    let mut candidate = None;
    for module in modules {
        if module.file_name() == query {
            return Some(module);
        }
        if candidate.is_none() && module.name == query {
            candidate = Some(module);
        }
    }
    candidate
}

impl ModuleRegistry {
    fn with_module<T>(&self, address: u64, f: impl FnOnce(&ModuleRecord) -> T) -> Option<T> {
        self.read().find_containing(address).map(f)
    }

    // Address lookups

    pub fn base_from_addr(&self, address: u64) -> Option<u64> {
        self.with_module(address, ModuleRecord::base)
    }

    pub fn size_from_addr(&self, address: u64) -> Option<u64> {
        self.with_module(address, ModuleRecord::size)
    }

    pub fn entry_from_addr(&self, address: u64) -> Option<u64> {
        self.with_module(address, |m| m.entry)
    }

    pub fn path_from_addr(&self, address: u64) -> Option<String> {
        self.with_module(address, |m| m.path.clone())
    }

    /// Lowercase module name, optionally followed by its extension
    pub fn name_from_addr(&self, address: u64, with_extension: bool) -> Option<String> {
        self.with_module(address, |m| {
            if with_extension {
                m.file_name()
            } else {
                m.name.clone()
            }
        })
    }

    pub fn sections_from_addr(&self, address: u64) -> Option<Vec<ModuleSection>> {
        self.with_module(address, |m| m.sections.clone())
    }

    /// Section of the containing module that covers `address`
    pub fn section_from_addr(&self, address: u64) -> Option<ModuleSection> {
        self.read()
            .find_containing(address)?
            .section_at(address)
            .cloned()
    }

    pub fn imports_from_addr(&self, address: u64) -> Option<Vec<ModuleImport>> {
        self.with_module(address, |m| m.imports.values().cloned().collect())
    }

    pub fn exports_from_addr(&self, address: u64) -> Option<Vec<ModuleExport>> {
        self.with_module(address, |m| m.exports.clone())
    }

    pub fn tls_callbacks_from_addr(&self, address: u64) -> Option<Vec<u64>> {
        self.with_module(address, |m| m.tls_callbacks.clone())
    }

    pub fn trust_class_from_addr(&self, address: u64) -> Option<TrustClass> {
        self.with_module(address, |m| m.trust)
    }

    pub fn symbol_signature_from_addr(&self, address: u64) -> Option<String> {
        self.with_module(address, |m| m.symbol_signature.clone())
    }

    /// Whether the containing module's symbols are still being loaded
    pub fn symbols_loading(&self, address: u64) -> bool {
        self.with_module(address, |m| m.symbols.is_loading())
            .unwrap_or(false)
    }

    /// Public symbol starting exactly at `address`, if the provider knows it
    pub fn symbol_from_addr(&self, address: u64) -> Option<String> {
        let modules = self.read();
        let module = modules.find_containing(address)?;
        let rva = u32::try_from(address - module.base()).ok()?;
        module.symbols.provider()?.symbol_at(rva)
    }

    // Relocations

    pub fn relocations_from_addr(&self, address: u64) -> Option<Vec<Relocation>> {
        self.with_module(address, |m| m.relocations.clone())
    }

    /// Relocation whose patched bytes cover `address`
    pub fn relocation_at_addr(&self, address: u64) -> Option<Relocation> {
        self.read().find_containing(address)?.relocation_at(address)
    }

    /// Relocations of the module containing `address` that start inside
    /// `[address, address + size)`
    pub fn relocations_in_range(&self, address: u64, size: u64) -> Vec<Relocation> {
        self.with_module(address, |m| m.relocations_in_range(address, size))
            .unwrap_or_default()
    }

    // Names and hashes

    pub fn base_from_name(&self, name: &str) -> Option<u64> {
        find_by_name(&self.read(), name).map(ModuleRecord::base)
    }

    pub fn path_from_name(&self, name: &str) -> Option<String> {
        find_by_name(&self.read(), name).map(|m| m.path.clone())
    }

    /// Address-stable hash: module hash plus the offset into the module, or
    /// the address itself outside any module.
    pub fn hash_from_addr(&self, address: u64) -> u64 {
        self.with_module(address, |m| m.hash.wrapping_add(address - m.base()))
            .unwrap_or(address)
    }

    /// Hash of the containing module's file contents, zero without a file
    pub fn content_hash_from_addr(&self, address: u64) -> u64 {
        self.with_module(address, ModuleRecord::content_hash)
            .unwrap_or(0)
    }

    // Mutators

    pub fn set_trust_class(&self, address: u64, trust: TrustClass) -> bool {
        match self.write().find_containing_mut(address) {
            Some(module) => {
                module.trust = trust;
                true
            }
            None => false,
        }
    }

    /// Record an import slot on the module containing `base`
    pub fn add_import(&self, base: u64, import: ModuleImport) -> bool {
        if base == 0 {
            return false;
        }
        self.write()
            .find_containing_mut(base)
            .is_some_and(|m| m.add_import(import))
    }

    // Bulk access

    /// Snapshot of every module, in base order
    pub fn module_list(&self) -> Vec<ModuleInfo> {
        self.read().iter().map(ModuleRecord::info).collect()
    }

    /// Visit every module under a single shared lock
    pub fn for_each(&self, mut visit: impl FnMut(&ModuleRecord)) {
        for module in self.read().iter() {
            visit(module);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AddressRange, RelocationKind};

    fn record(base: u64, size: u64, name: &str, ext: &str) -> ModuleRecord {
        ModuleRecord {
            range: AddressRange::new(base, size),
            name: name.to_string(),
            extension: ext.to_string(),
            path: format!("C:\\app\\{}{}", name, ext),
            hash: crate::hashing::name_hash(&format!("{}{}", name, ext)),
            entry: base + 0x1000,
            sections: vec![ModuleSection {
                name: ".text".to_string(),
                address: base + 0x1000,
                size: 0x800,
            }],
            relocations: vec![
                Relocation::new(0x1004, RelocationKind::HighLow),
                Relocation::new(0x1100, RelocationKind::Dir64),
            ],
            ..ModuleRecord::default()
        }
    }

    fn registry() -> ModuleRegistry {
        let registry = ModuleRegistry::new();
        {
            let mut modules = registry.write();
            modules.insert(record(0x1000_0000, 0x4000, "app", ".exe")).unwrap();
            modules.insert(record(0x2000_0000, 0x4000, "helper", ".dll")).unwrap();
            modules.insert(record(0x3000_0000, 0x4000, "helper", ".exe")).unwrap();
        }
        registry
    }

    #[test]
    fn test_address_lookups() {
        let r = registry();
        assert_eq!(r.base_from_addr(0x1000_3FFF), Some(0x1000_0000));
        assert_eq!(r.base_from_addr(0x1000_4000), None);
        assert_eq!(r.size_from_addr(0x2000_0000), Some(0x4000));
        assert_eq!(r.entry_from_addr(0x2000_0010), Some(0x2000_1000));
        assert_eq!(r.name_from_addr(0x1000_0000, true).as_deref(), Some("app.exe"));
        assert_eq!(r.name_from_addr(0x1000_0000, false).as_deref(), Some("app"));
        assert_eq!(r.path_from_addr(0x2000_0000).as_deref(), Some("C:\\app\\helper.dll"));
        assert_eq!(
            r.section_from_addr(0x1000_1234).map(|s| s.name),
            Some(".text".to_string())
        );
        assert!(r.section_from_addr(0x1000_0100).is_none());
        assert_eq!(r.trust_class_from_addr(0x1000_0000), Some(TrustClass::User));
        assert_eq!(r.trust_class_from_addr(0x10), None);
        assert!(!r.symbols_loading(0x1000_0000));
        assert!(r.symbol_from_addr(0x1000_1000).is_none());
    }

    #[test]
    fn test_relocation_queries() {
        let r = registry();
        assert_eq!(r.relocation_at_addr(0x1000_1006).map(|x| x.rva), Some(0x1004));
        assert_eq!(r.relocation_at_addr(0x1000_1008), None);
        assert_eq!(r.relocations_in_range(0x1000_1000, 0x200).len(), 2);
        assert_eq!(r.relocations_in_range(0x1000_1005, 0x10).len(), 0);
        assert!(r.relocations_in_range(0x5000_0000, 0x200).is_empty());
        assert_eq!(r.relocations_from_addr(0x2000_0000).map(|v| v.len()), Some(2));
    }

    #[test]
    fn test_base_from_name_prefers_full_name() {
        let r = registry();
        assert_eq!(r.base_from_name("HELPER.EXE"), Some(0x3000_0000));
        assert_eq!(r.base_from_name("helper.dll"), Some(0x2000_0000));
        // extension-less: first candidate in base order
        assert_eq!(r.base_from_name("Helper"), Some(0x2000_0000));
        assert_eq!(r.base_from_name("missing"), None);
        assert_eq!(r.base_from_name(""), None);
        assert_eq!(
            r.path_from_name("app").as_deref(),
            Some("C:\\app\\app.exe")
        );
    }

    #[test]
    fn test_hash_from_addr() {
        let r = registry();
        let base_hash = crate::hashing::name_hash("app.exe");
        assert_eq!(r.hash_from_addr(0x1000_0010), base_hash.wrapping_add(0x10));
        assert_eq!(r.hash_from_addr(0x4242), 0x4242);
        assert_eq!(r.content_hash_from_addr(0x1000_0000), 0);
        assert_eq!(r.content_hash_from_addr(0x4242), 0);
    }

    #[test]
    fn test_mutators() {
        let r = registry();
        assert!(r.set_trust_class(0x2000_0100, TrustClass::System));
        assert_eq!(r.trust_class_from_addr(0x2000_0000), Some(TrustClass::System));
        assert!(!r.set_trust_class(0x10, TrustClass::System));

        let import = ModuleImport {
            address: 0x2000_2000,
            ordinal: Some(12),
            name: None,
        };
        assert!(r.add_import(0x2000_0000, import.clone()));
        assert!(!r.add_import(0x2000_0000, import.clone()));
        assert!(!r.add_import(0, import.clone()));
        assert!(!r.add_import(0x5000_0000, import));
        assert_eq!(r.imports_from_addr(0x2000_0000).map(|v| v.len()), Some(1));
    }

    #[test]
    fn test_module_list_and_for_each() {
        let r = registry();
        let list = r.module_list();
        assert_eq!(
            list.iter().map(|m| m.base).collect::<Vec<_>>(),
            vec![0x1000_0000, 0x2000_0000, 0x3000_0000]
        );

        let mut total = 0;
        r.for_each(|m| total += m.size());
        assert_eq!(total, 0xC000);
    }
}
