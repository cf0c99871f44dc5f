//! Builds module records from load events and keeps the registry in sync.
//!
//! A load never fails because of the image contents. Missing files,
//! unreadable memory and malformed directories all degrade the affected
//! fields to empty and the module is still registered. Only bad arguments and
//! overlapping ranges are reported back to the caller.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::core::{
    AddressRange, ModuleExport, ModuleRecord, ModuleSection, Relocation, TrustClass,
};
use crate::error::{ModuleError, Result};
use crate::formats::pe::{CodeViewInfo, ImageLayout, PeImage};
use crate::io::FileMapping;
use crate::memory::{
    LabelSink, ModuleEvent, ModuleListObserver, NoLabels, NoMemory, TargetMemory,
};
use crate::modules::registry::{ModuleRegistry, Rejected};
use crate::symbols::{NoSymbols, SymbolProviderFactory, SymbolRequest, SymbolSource};

/// Label placed on a virtual module's entry point
pub const ENTRY_POINT_LABEL: &str = "EntryPoint";

/// Owned metadata pulled out of a parsed image
#[derive(Debug, Default)]
struct ImageMetadata {
    size_of_image: u64,
    entry: u64,
    sections: Vec<ModuleSection>,
    relocations: Vec<Relocation>,
    tls_callbacks: Vec<u64>,
    codeview: Option<CodeViewInfo>,
    exports: Vec<ModuleExport>,
}

/// Handles module load and unload events for one debug session.
pub struct ModuleLoader {
    registry: Arc<ModuleRegistry>,
    config: RegistryConfig,
    memory: Arc<dyn TargetMemory>,
    symbols: Arc<dyn SymbolProviderFactory>,
    labels: Arc<dyn LabelSink>,
    observers: Vec<Arc<dyn ModuleListObserver>>,
}

impl ModuleLoader {
    /// Loader with no target memory, no symbols and no label sink
    pub fn new(registry: Arc<ModuleRegistry>, config: RegistryConfig) -> Self {
        Self {
            registry,
            config,
            memory: Arc::new(NoMemory),
            symbols: Arc::new(NoSymbols),
            labels: Arc::new(NoLabels),
            observers: Vec::new(),
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn TargetMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_symbols(mut self, symbols: Arc<dyn SymbolProviderFactory>) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn with_labels(mut self, labels: Arc<dyn LabelSink>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ModuleListObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register the module mapped at `base`.
    pub fn load(&self, base: u64, size: u64, path: &str) -> Result<()> {
        if base == 0 {
            return Err(ModuleError::InvalidArgument("module base is zero"));
        }
        if size == 0 {
            return Err(ModuleError::InvalidArgument("module size is zero"));
        }
        if path.is_empty() {
            return Err(ModuleError::InvalidArgument("module path is empty"));
        }

        let span = crate::module_span!("load", base);
        let _enter = span.enter();

        let (name, extension) = split_module_path(path);
        let hash = self.registry.hash_from_name(&format!("{}{}", name, extension));
        let trust = self.classify(path);
        let is_virtual = path.starts_with(self.config.loader.virtual_prefix.as_str());

        let mut size = size;
        let mut mapping = None;
        let metadata = if is_virtual {
            self.virtual_metadata(base, size)
        } else {
            match FileMapping::open(path, &self.config.io) {
                Ok(file) => {
                    let metadata = self.image_metadata(file.bytes(), ImageLayout::File, base);
                    mapping = Some(file);
                    metadata
                }
                Err(e) => {
                    warn!(path, error = %e, "could not map module file");
                    None
                }
            }
        }
        .unwrap_or_default();

        if !is_virtual && metadata.size_of_image != 0 {
            size = metadata.size_of_image;
        }

        let (symbol_signature, symbol_file) = metadata
            .codeview
            .as_ref()
            .map(|cv| (cv.signature.clone(), cv.pdb_file.clone()))
            .unwrap_or_default();

        let symbols = self.attach_symbols(&SymbolRequest {
            module_path: path,
            base,
            size,
            symbol_file: &symbol_file,
            codeview: metadata.codeview.as_ref(),
            is_virtual,
        });

        let record = ModuleRecord {
            range: AddressRange::new(base, size),
            name,
            extension,
            path: path.to_string(),
            hash,
            trust,
            entry: metadata.entry,
            sections: metadata.sections,
            exports: metadata.exports,
            relocations: metadata.relocations,
            tls_callbacks: metadata.tls_callbacks,
            symbol_signature,
            symbol_file,
            symbols,
            mapping,
            is_virtual,
            ..ModuleRecord::default()
        };

        let synthesize = is_virtual && self.config.loader.synthesize_labels;
        let inserted = {
            let mut modules = self.registry.write();
            match modules.try_insert(record) {
                Ok(()) => modules.find_containing(base).map(|inserted| {
                    let labels = if synthesize {
                        virtual_module_labels(inserted)
                    } else {
                        Vec::new()
                    };
                    (inserted.info(), labels)
                }),
                Err(Rejected { error, record }) => {
                    // the rejected record's symbols are released outside the lock
                    drop(modules);
                    drop(record);
                    warn!(path, error = %error, "module not registered");
                    return Err(error);
                }
            }
        };
        let (info, labels) = inserted.ok_or(ModuleError::NotFound(base))?;

        for (address, text) in &labels {
            self.labels.set_label(*address, text);
        }

        info!(
            name = %format!("{}{}", info.name, info.extension),
            base = info.base,
            size = info.size,
            trust = %info.trust,
            is_virtual,
            labels = labels.len(),
            "module loaded"
        );

        self.notify(&ModuleEvent::Loaded(info));
        Ok(())
    }

    /// Drop the module whose range contains `base`
    pub fn unload(&self, base: u64) -> Result<()> {
        let span = crate::module_span!("unload", base);
        let _enter = span.enter();

        let mut record = self
            .registry
            .write()
            .remove(base)
            .ok_or(ModuleError::NotFound(base))?;

        let was_loading = record.symbols.is_loading();
        record.release();
        let name = record.file_name();
        info!(name = %name, was_loading, "module unloaded");

        self.notify(&ModuleEvent::Unloaded {
            base: record.base(),
            name,
        });
        Ok(())
    }

    /// Drop every module and forget every cached name
    pub fn clear(&self) {
        let mut records = self.registry.write().drain();
        for record in &mut records {
            record.release();
        }
        self.registry.clear_names();
        info!(count = records.len(), "module list cleared");

        self.notify(&ModuleEvent::Cleared);
    }

    fn notify(&self, event: &ModuleEvent) {
        for observer in &self.observers {
            observer.modules_changed(event);
        }
    }

    /// System when the path lies below the configured system root
    fn classify(&self, path: &str) -> TrustClass {
        let root = self
            .config
            .loader
            .system_root
            .trim_end_matches(['\\', '/'])
            .to_lowercase();
        if root.is_empty() {
            return TrustClass::User;
        }

        let prefix = format!("{}\\", root);
        if path.to_lowercase().starts_with(&prefix) {
            TrustClass::System
        } else {
            TrustClass::User
        }
    }

    fn virtual_metadata(&self, base: u64, size: u64) -> Option<ImageMetadata> {
        let limit = self.config.io.max_snapshot_size;
        if size > limit {
            warn!(
                size,
                limit, "virtual module larger than snapshot limit, skipping metadata"
            );
            return None;
        }
        let len = usize::try_from(size).ok()?;
        let snapshot: Bytes = match self.memory.read_bytes(base, len) {
            Some(bytes) => bytes,
            None => {
                warn!(len, "virtual module memory is unreadable");
                return None;
            }
        };
        self.image_metadata(&snapshot, ImageLayout::Mapped, base)
    }

    fn image_metadata(&self, data: &[u8], layout: ImageLayout, base: u64) -> Option<ImageMetadata> {
        let image = match PeImage::with_options(data, layout, self.config.parsers.parse_options()) {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %e, "image headers are invalid, no metadata");
                return None;
            }
        };
        Some(extract_metadata(&image, base))
    }

    fn attach_symbols(&self, request: &SymbolRequest<'_>) -> SymbolSource {
        match self.symbols.attach(request) {
            Ok(provider) => {
                if provider.is_loading() {
                    info!(path = request.module_path, provider = provider.name(), "loading symbols async");
                } else if provider.is_open() {
                    info!(path = request.module_path, provider = provider.name(), "symbols loaded");
                } else {
                    info!(path = request.module_path, "no symbols loaded");
                }
                SymbolSource::External(provider)
            }
            Err(e) => {
                info!(path = request.module_path, reason = %e, "no symbols loaded");
                SymbolSource::Empty
            }
        }
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("config", &self.config)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

/// Run every directory extractor. Each one fails on its own.
fn extract_metadata(image: &PeImage<'_>, base: u64) -> ImageMetadata {
    let entry_rva = image.entry_point();
    let entry = if entry_rva == 0 && image.is_dll() {
        0
    } else {
        base.wrapping_add(u64::from(entry_rva))
    };

    let sections = image
        .sections()
        .iter()
        .map(|s| ModuleSection {
            name: s.header.name(),
            address: base.wrapping_add(u64::from(s.header.virtual_address)),
            size: u64::from(s.header.virtual_size),
        })
        .collect();

    let relocations = match image.relocations() {
        Ok(raw) => raw
            .into_iter()
            .filter_map(|r| Relocation::try_from(r).ok())
            .collect::<Vec<_>>(),
        Err(e) => {
            warn!(directory = "relocation", error = %e, "dropping relocations");
            Vec::new()
        }
    };

    let tls_callbacks = image.tls_callbacks(base).unwrap_or_else(|e| {
        warn!(directory = "tls", error = %e, "dropping tls callbacks");
        Vec::new()
    });

    let codeview = image.codeview().unwrap_or_else(|e| {
        debug!(directory = "debug", error = %e, "no codeview record");
        None
    });

    let exports = match image.exports() {
        Ok(table) => table
            .exports
            .iter()
            .map(|e| ModuleExport {
                name: e.name.map(str::to_string),
                ordinal: e.ordinal,
                address: if e.forwarder.is_some() {
                    0
                } else {
                    base.wrapping_add(u64::from(e.rva))
                },
                forwarder: e.forwarder.map(str::to_string),
            })
            .collect(),
        Err(e) => {
            warn!(directory = "export", error = %e, "dropping exports");
            Vec::new()
        }
    };

    let metadata = ImageMetadata {
        size_of_image: u64::from(image.size_of_image()),
        entry,
        sections,
        relocations,
        tls_callbacks,
        codeview,
        exports,
    };
    debug!(
        sections = metadata.sections.len(),
        relocations = metadata.relocations.len(),
        tls_callbacks = metadata.tls_callbacks.len(),
        exports = metadata.exports.len(),
        codeview = metadata.codeview.is_some(),
        "image metadata extracted"
    );
    metadata
}

/// Labels for a virtual module: its entry point and its local named exports
fn virtual_module_labels(module: &ModuleRecord) -> Vec<(u64, String)> {
    let mut labels = Vec::new();
    if module.contains(module.entry) {
        labels.push((module.entry, ENTRY_POINT_LABEL.to_string()));
    }
    labels.extend(module.exports.iter().filter_map(|e| match (&e.name, &e.forwarder) {
        (Some(name), None) if e.address != 0 => Some((e.address, name.clone())),
        _ => None,
    }));
    labels
}

/// Split a module path into a lowercase file name and lowercase extension
/// (including the dot). Both `\` and `/` separate directories.
pub fn split_module_path(path: &str) -> (String, String) {
    let file = path.rsplit(['\\', '/']).next().unwrap_or(path).to_lowercase();
    match file.rfind('.') {
        Some(dot) => {
            let (name, extension) = file.split_at(dot);
            (name.to_string(), extension.to_string())
        }
        None => (file, String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;

    fn loader_with_root(root: &str) -> ModuleLoader {
        let config = RegistryConfig {
            loader: LoaderConfig {
                system_root: root.to_string(),
                ..LoaderConfig::default()
            },
            ..RegistryConfig::default()
        };
        ModuleLoader::new(Arc::new(ModuleRegistry::new()), config)
    }

    #[test]
    fn test_split_module_path() {
        assert_eq!(
            split_module_path("C:\\Windows\\System32\\KERNEL32.DLL"),
            ("kernel32".to_string(), ".dll".to_string())
        );
        assert_eq!(
            split_module_path("/opt/App/libFoo.so.1"),
            ("libfoo.so".to_string(), ".1".to_string())
        );
        assert_eq!(split_module_path("ntdll"), ("ntdll".to_string(), String::new()));
        assert_eq!(
            split_module_path("virtual:\\Blob.bin"),
            ("blob".to_string(), ".bin".to_string())
        );
    }

    #[test]
    fn test_classify_trust() {
        let loader = loader_with_root("C:\\Windows");
        assert_eq!(loader.classify("c:\\windows\\system32\\ntdll.dll"), TrustClass::System);
        assert_eq!(loader.classify("C:\\WINDOWS\\explorer.exe"), TrustClass::System);
        assert_eq!(loader.classify("C:\\WindowsApps\\app.exe"), TrustClass::User);
        assert_eq!(loader.classify("D:\\tools\\app.exe"), TrustClass::User);

        let loader = loader_with_root("C:\\Windows\\");
        assert_eq!(loader.classify("C:\\Windows\\a.dll"), TrustClass::System);
    }

    #[test]
    fn test_zero_arguments_rejected() {
        let loader = loader_with_root("C:\\Windows");
        for (base, size, path) in [(0u64, 0x1000u64, "a.dll"), (0x1000, 0, "a.dll"), (0x1000, 0x1000, "")] {
            assert!(matches!(
                loader.load(base, size, path),
                Err(ModuleError::InvalidArgument(_))
            ));
        }
        assert!(loader.registry().read().is_empty());
    }

    #[test]
    fn test_missing_file_still_registers() {
        let loader = loader_with_root("C:\\Windows");
        loader
            .load(0x7000_0000, 0x3000, "/nonexistent/dir/missing.dll")
            .unwrap();

        let modules = loader.registry().read();
        let m = modules.find_containing(0x7000_1000).unwrap();
        assert_eq!(m.name, "missing");
        assert_eq!(m.extension, ".dll");
        assert_eq!(m.size(), 0x3000);
        assert_eq!(m.entry, 0);
        assert!(m.sections.is_empty());
        assert!(m.symbols.is_empty());
        assert!(m.mapping.is_none());
    }

    #[test]
    fn test_virtual_labels_skip_forwarders() {
        let record = ModuleRecord {
            range: AddressRange::new(0x1000_0000, 0x2000),
            entry: 0x1000_1000,
            exports: vec![
                ModuleExport {
                    name: Some("Run".to_string()),
                    ordinal: 1,
                    address: 0x1000_1010,
                    forwarder: None,
                },
                ModuleExport {
                    name: Some("Fwd".to_string()),
                    ordinal: 2,
                    address: 0,
                    forwarder: Some("other.Fwd".to_string()),
                },
                ModuleExport {
                    name: None,
                    ordinal: 3,
                    address: 0x1000_1020,
                    forwarder: None,
                },
            ],
            ..ModuleRecord::default()
        };
        assert_eq!(
            virtual_module_labels(&record),
            vec![
                (0x1000_1000, ENTRY_POINT_LABEL.to_string()),
                (0x1000_1010, "Run".to_string()),
            ]
        );
    }
}
