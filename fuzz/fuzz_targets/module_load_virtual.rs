#![no_main]
use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use modreg::config::RegistryConfig;
use modreg::memory::MemoryImage;
use modreg::{ModuleLoader, ModuleRegistry};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let base = 0x1000_0000u64;
    let mut memory = MemoryImage::new();
    memory.map(base, data.to_vec());

    let loader = ModuleLoader::new(Arc::new(ModuleRegistry::new()), RegistryConfig::default())
        .with_memory(Arc::new(memory));
    let _ = loader.load(base, data.len() as u64, "virtual:\\fuzz.dll");
    let _ = loader.registry().relocations_in_range(base, data.len() as u64);
    let _ = loader.unload(base);
});
