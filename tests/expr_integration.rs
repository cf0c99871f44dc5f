//! Expression helpers over a loaded virtual module.

mod common;

use std::sync::Arc;

use common::pe_fixture::TEXT_RVA;
use common::*;
use modreg::disasm::IcedDecoder;
use modreg::expr::ExprContext;
use modreg::memory::{MemoryImage, TargetMemory};

#[test]
fn helpers_answer_for_loaded_module() {
    let mut pe = PeFixture::new64();
    pe.entry_point = TEXT_RVA;
    let image = pe.build_mapped();
    let size = image.len() as u64;
    let base = 0x7FF0_0000_0000u64;

    let mut memory = MemoryImage::new();
    memory.map(base, image);
    let memory: Arc<dyn TargetMemory> = Arc::new(memory);

    let loader = new_loader().with_memory(memory.clone());
    loader.load(base, size, "virtual:\\code.bin").unwrap();

    let decoder = Arc::new(IcedDecoder::new(memory.clone(), 64));
    let ctx = ExprContext::new(loader.registry().clone(), memory, decoder);

    let entry = base + u64::from(TEXT_RVA);
    assert_eq!(ctx.modbase(entry + 0x20), base);
    assert_eq!(ctx.modsize(entry), size);
    assert_eq!(ctx.modentry(base), entry);
    assert_eq!(ctx.modparty(entry), 0);

    // .text is filled with `ret`
    assert_eq!(ctx.dislen(entry), 1);
    assert_eq!(ctx.disisret(entry), 1);
    assert_eq!(ctx.disisbranch(entry), 0);
    assert_eq!(ctx.memvalid(entry), 1);
    assert_eq!(ctx.memvalid(base + size), 0);

    assert_eq!(ctx.call("mod.hash", &[base + 4]), Some(loader.registry().hash_from_addr(base + 4)));
    assert_eq!(ctx.call("mod.party", &[0x10]), Some(0));
}
