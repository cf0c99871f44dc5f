//! Debug directory parsing
//!
//! Only CodeView records are decoded. Both the NB10 (signature + age) and
//! RSDS (GUID + age) forms produce the canonical signature string symbol
//! servers index PDB files by.

use crate::formats::pe::types::*;
use crate::formats::pe::utils::ReadExt;
use crate::formats::pe::PeImage;

const DEBUG_DIRECTORY_SIZE: usize = 28;
const NB10_NAME_OFFSET: usize = 16;
const RSDS_NAME_OFFSET: usize = 24;

fn parse_debug_entry(raw: &[u8]) -> DebugEntry {
    let u16_at = |o: usize| raw.read_u16_le_at(o).unwrap_or_default();
    let u32_at = |o: usize| raw.read_u32_le_at(o).unwrap_or_default();
    DebugEntry {
        characteristics: u32_at(0),
        time_date_stamp: u32_at(4),
        major_version: u16_at(8),
        minor_version: u16_at(10),
        debug_type: u32_at(12),
        size_of_data: u32_at(16),
        address_of_raw_data: u32_at(20),
        pointer_to_raw_data: u32_at(24),
    }
}

/// Read the first debug directory entry
pub fn parse_first_debug_entry(image: &PeImage<'_>) -> Result<Option<DebugEntry>> {
    let dir = *image.data_directory(IMAGE_DIRECTORY_ENTRY_DEBUG)?;
    if !dir.is_present() {
        return Ok(None);
    }

    let offset = image
        .rva_range_to_offset(dir.virtual_address, DEBUG_DIRECTORY_SIZE)
        .ok_or_else(|| {
            PeError::malformed(
                "debug",
                format!("directory at 0x{:08x} outside image", dir.virtual_address),
            )
        })?;
    let raw = image
        .data()
        .read_slice_at(offset, DEBUG_DIRECTORY_SIZE)
        .ok_or(PeError::InvalidOffset { offset })?;

    Ok(Some(parse_debug_entry(raw)))
}

/// Decode the CodeView record referenced by the first debug directory entry.
///
/// Returns `Ok(None)` when the image has no debug directory and
/// `Err(PeError::UnsupportedDebugType)` when the entry is not CodeView.
pub fn parse_debug_directory(
    image: &PeImage<'_>,
    options: &ParseOptions,
) -> Result<Option<CodeViewInfo>> {
    let Some(entry) = parse_first_debug_entry(image)? else {
        return Ok(None);
    };
    if entry.debug_type != IMAGE_DEBUG_TYPE_CODEVIEW {
        return Err(PeError::UnsupportedDebugType(entry.debug_type));
    }

    let size = entry.size_of_data as usize;
    let offset = image
        .rva_range_to_offset(entry.address_of_raw_data, size)
        .ok_or_else(|| {
            PeError::malformed(
                "debug",
                format!(
                    "codeview data 0x{:08x}+0x{:x} outside image",
                    entry.address_of_raw_data, size
                ),
            )
        })?;
    let cv = image
        .data()
        .read_slice_at(offset, size)
        .ok_or(PeError::InvalidOffset { offset })?;

    decode_codeview(cv, options).map(Some)
}

/// Decode a raw CodeView record
pub fn decode_codeview(cv: &[u8], options: &ParseOptions) -> Result<CodeViewInfo> {
    let short = || PeError::malformed("debug", "codeview record truncated");
    let magic = cv.read_u32_le_at(0).ok_or_else(short)?;

    match magic {
        CV_SIGNATURE_NB10 => {
            let signature = cv.read_u32_le_at(8).ok_or_else(short)?;
            let age = cv.read_u32_le_at(12).ok_or_else(short)?;
            let pdb_file = read_pdb_name(cv, NB10_NAME_OFFSET, options)?;
            Ok(CodeViewInfo {
                signature: format!("{:X}{:X}", signature, age),
                pdb_file,
                guid: None,
                age,
            })
        }
        CV_SIGNATURE_RSDS => {
            let guid: [u8; 16] = cv
                .read_slice_at(4, 16)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(short)?;
            let age = cv.read_u32_le_at(20).ok_or_else(short)?;
            let pdb_file = read_pdb_name(cv, RSDS_NAME_OFFSET, options)?;
            Ok(CodeViewInfo {
                signature: guid_signature(&guid, age),
                pdb_file,
                guid: Some(guid),
                age,
            })
        }
        other => Err(PeError::UnknownCodeViewSignature(other)),
    }
}

/// Symbol-server signature for a GUID/age pair: Data1, Data2 and Data3 as
/// fixed-width hex, Data4 as raw hex bytes, then the age without padding.
pub fn guid_signature(guid: &[u8; 16], age: u32) -> String {
    let data1 = u32::from_le_bytes([guid[0], guid[1], guid[2], guid[3]]);
    let data2 = u16::from_le_bytes([guid[4], guid[5]]);
    let data3 = u16::from_le_bytes([guid[6], guid[7]]);
    format!(
        "{:08X}{:04X}{:04X}{}{:X}",
        data1,
        data2,
        data3,
        hex::encode_upper(&guid[8..16]),
        age
    )
}

fn read_pdb_name(cv: &[u8], offset: usize, options: &ParseOptions) -> Result<String> {
    let tail = cv
        .get(offset..)
        .ok_or_else(|| PeError::malformed("debug", "codeview record truncated"))?;
    let len = tail
        .iter()
        .take(options.max_name_len)
        .position(|&b| b == 0)
        .unwrap_or_else(|| tail.len().min(options.max_name_len));
    Ok(String::from_utf8_lossy(&tail[..len]).into_owned())
}
