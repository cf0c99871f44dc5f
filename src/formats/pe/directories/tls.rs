//! TLS directory parsing

use crate::formats::pe::types::*;
use crate::formats::pe::utils::ReadExt;
use crate::formats::pe::PeImage;

/// Read the TLS directory structure itself
pub fn parse_tls_directory(image: &PeImage<'_>) -> Result<Option<TlsDirectory>> {
    let dir = *image.data_directory(IMAGE_DIRECTORY_ENTRY_TLS)?;
    if !dir.is_present() {
        return Ok(None);
    }

    let is_64bit = image.is_64bit();
    let len = if is_64bit { 40 } else { 24 };
    let offset = image
        .rva_range_to_offset(dir.virtual_address, len)
        .ok_or_else(|| {
            PeError::malformed(
                "tls",
                format!("directory at 0x{:08x} outside image", dir.virtual_address),
            )
        })?;
    let raw = image
        .data()
        .read_slice_at(offset, len)
        .ok_or(PeError::InvalidOffset { offset })?;

    let width = if is_64bit { 8 } else { 4 };
    let ptr = |i: usize| raw.read_ptr_at(i * width, is_64bit).unwrap_or_default();
    let tail = 4 * width;

    Ok(Some(TlsDirectory {
        start_address_of_raw_data: ptr(0),
        end_address_of_raw_data: ptr(1),
        address_of_index: ptr(2),
        address_of_callbacks: ptr(3),
        size_of_zero_fill: raw.read_u32_le_at(tail).unwrap_or_default(),
        characteristics: raw.read_u32_le_at(tail + 4).unwrap_or_default(),
    }))
}

/// Collect TLS callbacks as absolute addresses for an image loaded at
/// `module_base`.
pub fn parse_tls_callbacks(
    image: &PeImage<'_>,
    module_base: u64,
    options: &ParseOptions,
) -> Result<Vec<u64>> {
    let Some(tls) = parse_tls_directory(image)? else {
        return Ok(Vec::new());
    };
    if tls.address_of_callbacks == 0 {
        return Ok(Vec::new());
    }

    let image_base = image.image_base();
    let array_rva = tls
        .address_of_callbacks
        .checked_sub(image_base)
        .and_then(|rva| u32::try_from(rva).ok())
        .ok_or_else(|| {
            PeError::malformed(
                "tls",
                format!(
                    "callback array 0x{:x} below image base 0x{:x}",
                    tls.address_of_callbacks, image_base
                ),
            )
        })?;

    let is_64bit = image.is_64bit();
    let width = if is_64bit { 8 } else { 4 };
    let data = image.data();

    let mut callbacks = Vec::new();
    loop {
        let entry_rva = u32::try_from(callbacks.len() * width)
            .ok()
            .and_then(|delta| array_rva.checked_add(delta))
            .ok_or(PeError::LimitExceeded("tls callbacks"))?;
        let raw = image
            .rva_range_to_offset(entry_rva, width)
            .and_then(|offset| data.read_ptr_at(offset, is_64bit))
            .ok_or_else(|| {
                PeError::malformed(
                    "tls",
                    format!("callback slot at rva 0x{:08x} outside image", entry_rva),
                )
            })?;

        if raw == 0 {
            break;
        }
        if callbacks.len() >= options.max_tls_callbacks {
            return Err(PeError::LimitExceeded("tls callbacks"));
        }
        callbacks.push(raw.wrapping_sub(image_base).wrapping_add(module_base));
    }

    Ok(callbacks)
}
