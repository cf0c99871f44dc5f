//! Base relocation table parsing

use crate::formats::pe::types::*;
use crate::formats::pe::utils::ReadExt;
use crate::formats::pe::PeImage;

const BLOCK_HEADER_SIZE: usize = 8;

/// Map a relocation type nibble to the number of bytes it patches.
///
/// Returns `None` for padding (`ABSOLUTE`) and for types a debugger has no
/// use for.
pub fn relocation_width(kind: u8) -> Option<u8> {
    match kind {
        IMAGE_REL_BASED_HIGHLOW => Some(4),
        IMAGE_REL_BASED_DIR64 => Some(8),
        IMAGE_REL_BASED_HIGH | IMAGE_REL_BASED_LOW | IMAGE_REL_BASED_HIGHADJ => Some(2),
        _ => None,
    }
}

/// Parse the base relocation directory, returning entries sorted by RVA.
pub fn parse_relocations(image: &PeImage<'_>, options: &ParseOptions) -> Result<Vec<BaseRelocation>> {
    if image.file_header().relocs_stripped() {
        return Ok(Vec::new());
    }

    let dir = *image.data_directory(IMAGE_DIRECTORY_ENTRY_BASERELOC)?;
    if !dir.is_present() {
        return Ok(Vec::new());
    }

    let dir_offset = image
        .rva_range_to_offset(dir.virtual_address, dir.size as usize)
        .ok_or_else(|| {
            PeError::malformed(
                "relocation",
                format!(
                    "directory 0x{:08x}+0x{:x} outside image",
                    dir.virtual_address, dir.size
                ),
            )
        })?;
    let table = image
        .data()
        .read_slice_at(dir_offset, dir.size as usize)
        .ok_or(PeError::InvalidOffset { offset: dir_offset })?;

    let mut relocations = Vec::new();
    let mut pos = 0usize;

    while pos < table.len() {
        let block = read_block(table, pos)?;
        let block_size = block.size_of_block as usize;
        if block_size < BLOCK_HEADER_SIZE {
            return Err(PeError::malformed(
                "relocation",
                format!("block at +0x{:x} has size {}", pos, block_size),
            ));
        }

        let count = (block_size - BLOCK_HEADER_SIZE) / 2;
        for i in 0..count {
            let entry_offset = pos + BLOCK_HEADER_SIZE + 2 * i;
            let entry = table.read_u16_le_at(entry_offset).ok_or_else(|| {
                PeError::malformed("relocation", format!("entry at +0x{:x} truncated", entry_offset))
            })?;

            let kind = (entry >> 12) as u8;
            let page_offset = u32::from(entry & 0x0FFF);
            if let Some(size) = relocation_width(kind) {
                if relocations.len() >= options.max_relocations {
                    return Err(PeError::LimitExceeded("relocations"));
                }
                relocations.push(BaseRelocation {
                    rva: block.virtual_address.wrapping_add(page_offset),
                    kind,
                    size,
                });
            }
        }

        pos += block_size;
    }

    relocations.sort_by_key(|r| r.rva);
    Ok(relocations)
}

fn read_block(table: &[u8], pos: usize) -> Result<BaseRelocationBlock> {
    match (table.read_u32_le_at(pos), table.read_u32_le_at(pos + 4)) {
        (Some(virtual_address), Some(size_of_block)) => Ok(BaseRelocationBlock {
            virtual_address,
            size_of_block,
        }),
        _ => Err(PeError::malformed(
            "relocation",
            format!("block header at +0x{:x} truncated", pos),
        )),
    }
}
