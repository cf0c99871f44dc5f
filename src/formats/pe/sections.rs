//! Section management for PE files

use std::cmp::Ordering;

use crate::formats::pe::types::*;
use crate::formats::pe::utils::ReadExt;

/// Section table for efficient RVA resolution
#[derive(Debug, Clone, Default)]
pub struct SectionTable {
    /// Sorted by virtual address
    sorted: Vec<Section>,
    /// Declaration order, as listed in the image
    declared: Vec<Section>,
}

impl SectionTable {
    /// Create a new section table
    pub fn new(sections: Vec<Section>) -> Self {
        // Sort by virtual address for binary search
        let mut sorted = sections.clone();
        sorted.sort_by_key(|s| s.header.virtual_address);
        Self {
            sorted,
            declared: sections,
        }
    }

    /// Get all sections in declaration order
    pub fn sections(&self) -> &[Section] {
        &self.declared
    }

    /// Find section by name
    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.declared.iter().find(|s| s.header.name() == name)
    }

    /// Find section containing RVA - O(log n) with binary search
    pub fn section_containing_rva(&self, rva: u32) -> Option<&Section> {
        let idx = self
            .sorted
            .binary_search_by(|s| {
                let start = u64::from(s.header.virtual_address);
                let end = start + u64::from(s.header.mapped_size());
                if u64::from(rva) < start {
                    Ordering::Greater
                } else if u64::from(rva) >= end {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
            .ok()?;
        self.sorted.get(idx)
    }

    /// Convert RVA to file offset for a raw (on-disk) image.
    ///
    /// RVAs below the first section resolve to themselves when they fall
    /// inside the headers, matching how the loader maps the header page.
    #[inline]
    pub fn rva_to_offset(&self, rva: u32, size_of_headers: u32) -> Option<usize> {
        if let Some(section) = self.section_containing_rva(rva) {
            let delta = rva - section.header.virtual_address;
            let offset = u64::from(section.header.pointer_to_raw_data) + u64::from(delta);
            return usize::try_from(offset).ok();
        }
        if rva < size_of_headers {
            return Some(rva as usize);
        }
        None
    }

    /// Convert file offset to RVA
    pub fn offset_to_rva(&self, offset: usize) -> Option<u32> {
        self.sorted.iter().find_map(|section| {
            let raw_start = section.header.pointer_to_raw_data as usize;
            let raw_end = raw_start.saturating_add(section.header.size_of_raw_data as usize);
            if offset >= raw_start && offset < raw_end {
                let delta = u32::try_from(offset - raw_start).ok()?;
                section.header.virtual_address.checked_add(delta)
            } else {
                None
            }
        })
    }

    /// Get executable sections
    pub fn executable_sections(&self) -> Vec<&Section> {
        self.declared
            .iter()
            .filter(|s| s.header.is_executable())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }
}

/// Parse section headers from data
pub fn parse_section_headers(data: &[u8], offset: usize, count: u16) -> Result<Vec<SectionHeader>> {
    let mut sections = Vec::with_capacity(count as usize);

    for i in 0..count as usize {
        let section_offset = offset + i * 40;
        let raw = data
            .read_slice_at(section_offset, 40)
            .ok_or(PeError::TruncatedHeader {
                expected: section_offset + 40,
                actual: data.len(),
            })?;

        let mut name = [0u8; 8];
        name.copy_from_slice(&raw[..8]);
        let u32_at = |o: usize| raw.read_u32_le_at(o).unwrap_or_default();

        sections.push(SectionHeader {
            name,
            virtual_size: u32_at(8),
            virtual_address: u32_at(12),
            size_of_raw_data: u32_at(16),
            pointer_to_raw_data: u32_at(20),
            characteristics: u32_at(36),
        });
    }

    Ok(sections)
}

/// Create section objects with data ranges
pub fn create_sections(headers: Vec<SectionHeader>) -> Vec<Section> {
    headers
        .into_iter()
        .map(|header| {
            let start = header.pointer_to_raw_data as usize;
            let end = start.saturating_add(header.size_of_raw_data as usize);
            Section {
                header,
                data: start..end,
            }
        })
        .collect()
}

impl Section {
    /// Get section data from the file
    pub fn data<'a>(&self, file_data: &'a [u8]) -> Option<&'a [u8]> {
        file_data.get(self.data.clone())
    }
}
