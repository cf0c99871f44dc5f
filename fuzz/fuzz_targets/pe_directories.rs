#![no_main]
use libfuzzer_sys::fuzz_target;
use modreg::formats::pe::{ImageLayout, PeImage};

fuzz_target!(|data: &[u8]| {
    for layout in [ImageLayout::File, ImageLayout::Mapped] {
        if let Ok(image) = PeImage::parse(data, layout) {
            let _ = image.relocations();
            let _ = image.tls_callbacks(0x1000_0000);
            let _ = image.codeview();
            let _ = image.exports().map(|e| e.count());
        }
    }
});
