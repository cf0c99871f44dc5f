//! PE header parsing

use crate::formats::pe::types::*;
use crate::formats::pe::utils::ReadExt;

fn truncated(expected: usize, actual: usize) -> PeError {
    PeError::TruncatedHeader { expected, actual }
}

/// Parse DOS header from data
pub fn parse_dos_header(data: &[u8]) -> Result<DosHeader> {
    if data.len() < DOS_HEADER_SIZE {
        return Err(truncated(DOS_HEADER_SIZE, data.len()));
    }

    let e_magic = data
        .read_u16_le_at(0)
        .ok_or(PeError::InvalidOffset { offset: 0 })?;
    if e_magic != DOS_SIGNATURE {
        return Err(PeError::InvalidDosSignature);
    }

    let e_lfanew = data
        .read_u32_le_at(60)
        .ok_or(PeError::InvalidOffset { offset: 60 })?;

    Ok(DosHeader { e_magic, e_lfanew })
}

/// Parse COFF header from data at offset
pub fn parse_coff_header(data: &[u8], offset: usize) -> Result<CoffHeader> {
    let header = data
        .read_slice_at(offset, 20)
        .ok_or_else(|| truncated(offset.saturating_add(20), data.len()))?;

    // The slice is exactly 20 bytes, so every fixed read below succeeds.
    let u16_at = |o: usize| header.read_u16_le_at(o).unwrap_or_default();
    let u32_at = |o: usize| header.read_u32_le_at(o).unwrap_or_default();

    Ok(CoffHeader {
        machine: u16_at(0),
        number_of_sections: u16_at(2),
        time_date_stamp: u32_at(4),
        size_of_optional_header: u16_at(16),
        characteristics: u16_at(18),
    })
}

/// Parse optional header from data at offset
pub fn parse_optional_header(data: &[u8], offset: usize, size: u16) -> Result<OptionalHeader> {
    let header = data
        .read_slice_at(offset, size as usize)
        .ok_or_else(|| truncated(offset.saturating_add(size as usize), data.len()))?;

    let magic = header
        .read_u16_le_at(0)
        .ok_or_else(|| truncated(offset + 2, offset + header.len()))?;

    // PE32 and PE32+ agree on every field below except image base (and the
    // size of the header before the data directories).
    let (minimum, image_base) = match magic {
        PE32_MAGIC => (96, header.read_u32_le_at(28).map(u64::from)),
        PE32PLUS_MAGIC => (112, header.read_u64_le_at(24)),
        _ => return Err(PeError::InvalidMagic(magic)),
    };

    if header.len() < minimum {
        return Err(truncated(offset + minimum, offset + header.len()));
    }

    let u16_at = |o: usize| header.read_u16_le_at(o).unwrap_or_default();
    let u32_at = |o: usize| header.read_u32_le_at(o).unwrap_or_default();

    Ok(OptionalHeader {
        magic,
        address_of_entry_point: u32_at(16),
        image_base: image_base.unwrap_or_default(),
        section_alignment: u32_at(32),
        file_alignment: u32_at(36),
        size_of_image: u32_at(56),
        size_of_headers: u32_at(60),
        dll_characteristics: u16_at(70),
        number_of_rva_and_sizes: u32_at(minimum - 4),
    })
}

/// Parse data directories from data at offset
pub fn parse_data_directories(data: &[u8], offset: usize, count: u32) -> Vec<DataDirectory> {
    let count = (count as usize).min(IMAGE_NUMBEROF_DIRECTORY_ENTRIES);
    let mut directories = Vec::with_capacity(IMAGE_NUMBEROF_DIRECTORY_ENTRIES);

    for i in 0..count {
        let dir_offset = offset + i * 8;
        match (
            data.read_u32_le_at(dir_offset),
            data.read_u32_le_at(dir_offset + 4),
        ) {
            (Some(virtual_address), Some(size)) => directories.push(DataDirectory {
                virtual_address,
                size,
            }),
            _ => break,
        }
    }

    // Pad with empty directories if needed
    directories.resize(IMAGE_NUMBEROF_DIRECTORY_ENTRIES, DataDirectory::default());
    directories
}

/// Parse NT headers (PE signature + COFF + Optional), returning the headers,
/// the data directories, and the offset of the section table.
pub fn parse_nt_headers(
    data: &[u8],
    offset: usize,
) -> Result<(NtHeaders, Vec<DataDirectory>, usize)> {
    let signature = data
        .read_slice_at(offset, 4)
        .ok_or_else(|| truncated(offset.saturating_add(4), data.len()))?;

    if signature != PE_SIGNATURE {
        return Err(PeError::InvalidPeSignature);
    }

    let file_header = parse_coff_header(data, offset + 4)?;

    let opt_offset = offset + 24; // 4 (signature) + 20 (COFF)
    let optional_header =
        parse_optional_header(data, opt_offset, file_header.size_of_optional_header)?;

    let dir_offset = opt_offset + if optional_header.is_64bit() { 112 } else { 96 };
    let directories =
        parse_data_directories(data, dir_offset, optional_header.number_of_rva_and_sizes);

    let section_offset = opt_offset + file_header.size_of_optional_header as usize;

    Ok((
        NtHeaders {
            file_header,
            optional_header,
        },
        directories,
        section_offset,
    ))
}
