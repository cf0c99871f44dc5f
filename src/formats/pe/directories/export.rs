//! Export table parsing

use std::collections::HashMap;

use crate::formats::pe::types::*;
use crate::formats::pe::utils::ReadExt;
use crate::formats::pe::PeImage;

const EXPORT_DIRECTORY_SIZE: usize = 40;

/// Export table containing all exports
#[derive(Debug, Clone, Default)]
pub struct ExportTable<'a> {
    pub dll_name: Option<&'a str>,
    pub ordinal_base: u32,
    pub exports: Vec<ExportEntry<'a>>,
    pub by_name: HashMap<&'a str, usize>,
}

impl<'a> ExportTable<'a> {
    /// Get export by name
    pub fn get_by_name(&self, name: &str) -> Option<&ExportEntry<'a>> {
        self.by_name
            .get(name)
            .and_then(|&idx| self.exports.get(idx))
    }

    /// Exports that resolve to code or data inside this image
    pub fn local(&self) -> impl Iterator<Item = &ExportEntry<'a>> {
        self.exports.iter().filter(|e| e.forwarder.is_none())
    }

    pub fn count(&self) -> usize {
        self.exports.len()
    }

    pub fn named_count(&self) -> usize {
        self.exports.iter().filter(|e| e.name.is_some()).count()
    }
}

fn field(table: &[u8], at: usize) -> u32 {
    // `table` is exactly EXPORT_DIRECTORY_SIZE bytes
    table.read_u32_le_at(at).unwrap_or_default()
}

/// Parse the export directory of `image`
pub fn parse_exports<'a>(image: &PeImage<'a>, options: &ParseOptions) -> Result<ExportTable<'a>> {
    let export_dir = *image.data_directory(IMAGE_DIRECTORY_ENTRY_EXPORT)?;
    if !export_dir.is_present() {
        return Ok(ExportTable::default());
    }

    let data = image.data();
    let dir_offset = image
        .rva_range_to_offset(export_dir.virtual_address, EXPORT_DIRECTORY_SIZE)
        .ok_or_else(|| {
            PeError::malformed(
                "export",
                format!("directory at 0x{:08x} outside image", export_dir.virtual_address),
            )
        })?;
    let header = data
        .read_slice_at(dir_offset, EXPORT_DIRECTORY_SIZE)
        .ok_or(PeError::InvalidOffset { offset: dir_offset })?;

    let name_rva = field(header, 12);
    let ordinal_base = field(header, 16);
    let declared_functions = field(header, 20) as usize;
    let declared_names = field(header, 24) as usize;
    let address_table_rva = field(header, 28);
    let name_table_rva = field(header, 32);
    let ordinal_table_rva = field(header, 36);

    // Keep the first max_exports entries of oversized tables
    let number_of_functions = declared_functions.min(options.max_exports);
    let number_of_names = declared_names.min(options.max_exports);
    if number_of_functions < declared_functions || number_of_names < declared_names {
        tracing::debug!(
            declared_functions,
            declared_names,
            limit = options.max_exports,
            "export table truncated"
        );
    }

    let dll_name = if name_rva != 0 {
        image.read_string_at_rva(name_rva).ok()
    } else {
        None
    };

    let addr_offset = image
        .rva_range_to_offset(address_table_rva, number_of_functions * 4)
        .ok_or_else(|| PeError::malformed("export", "address table outside image"))?;

    let mut addresses = Vec::with_capacity(number_of_functions);
    for i in 0..number_of_functions {
        let offset = addr_offset + i * 4;
        let rva = data
            .read_u32_le_at(offset)
            .ok_or(PeError::InvalidOffset { offset })?;
        addresses.push(rva);
    }

    // Function index -> name
    let mut name_map = HashMap::new();
    if number_of_names > 0 && name_table_rva != 0 && ordinal_table_rva != 0 {
        let name_offset = image
            .rva_range_to_offset(name_table_rva, number_of_names * 4)
            .ok_or_else(|| PeError::malformed("export", "name table outside image"))?;
        let ord_offset = image
            .rva_range_to_offset(ordinal_table_rva, number_of_names * 2)
            .ok_or_else(|| PeError::malformed("export", "ordinal table outside image"))?;

        for i in 0..number_of_names {
            let name_ptr_offset = name_offset + i * 4;
            let ord_val_offset = ord_offset + i * 2;

            let (Some(name_rva), Some(ordinal_index)) = (
                data.read_u32_le_at(name_ptr_offset),
                data.read_u16_le_at(ord_val_offset),
            ) else {
                break;
            };

            if name_rva == 0 {
                continue;
            }
            match image.read_string_at_rva(name_rva) {
                Ok(name) => {
                    name_map.insert(ordinal_index as usize, name);
                }
                Err(_) => {
                    tracing::debug!(name_rva, "skipping unreadable export name");
                }
            }
        }
    }

    let dir_end = u64::from(export_dir.virtual_address) + u64::from(export_dir.size);
    let mut exports = Vec::new();
    let mut by_name = HashMap::new();

    for (i, &rva) in addresses.iter().enumerate() {
        if rva == 0 {
            continue; // Unused slot
        }

        let ordinal = ordinal_base.wrapping_add(i as u32);
        let name = name_map.get(&i).copied();

        // An RVA inside the export directory names a forwarder string
        let forwarder = if rva >= export_dir.virtual_address && u64::from(rva) < dir_end {
            image.read_string_at_rva(rva).ok()
        } else {
            None
        };

        let entry_idx = exports.len();
        exports.push(ExportEntry {
            name,
            ordinal,
            rva,
            forwarder,
        });

        if let Some(n) = name {
            by_name.insert(n, entry_idx);
        }
    }

    Ok(ExportTable {
        dll_name,
        ordinal_base,
        exports,
        by_name,
    })
}
