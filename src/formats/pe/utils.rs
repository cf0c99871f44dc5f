//! Utility functions for PE parsing

use crate::formats::pe::types::{PeError, Result};

/// Extension trait for bounds-checked reads of primitive types from byte slices
pub trait ReadExt {
    fn read_u8_at(&self, offset: usize) -> Option<u8>;
    fn read_u16_le_at(&self, offset: usize) -> Option<u16>;
    fn read_u32_le_at(&self, offset: usize) -> Option<u32>;
    fn read_u64_le_at(&self, offset: usize) -> Option<u64>;
    /// Read a pointer-sized little-endian value (4 or 8 bytes)
    fn read_ptr_at(&self, offset: usize, is_64bit: bool) -> Option<u64>;
    fn read_cstring_at(&self, offset: usize, max_len: usize) -> Option<&str>;
    fn read_slice_at(&self, offset: usize, len: usize) -> Option<&[u8]>;
}

impl ReadExt for [u8] {
    #[inline(always)]
    fn read_u8_at(&self, offset: usize) -> Option<u8> {
        self.get(offset).copied()
    }

    #[inline(always)]
    fn read_u16_le_at(&self, offset: usize) -> Option<u16> {
        self.read_slice_at(offset, 2)
            .and_then(|b| b.try_into().ok())
            .map(u16::from_le_bytes)
    }

    #[inline(always)]
    fn read_u32_le_at(&self, offset: usize) -> Option<u32> {
        self.read_slice_at(offset, 4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
    }

    #[inline(always)]
    fn read_u64_le_at(&self, offset: usize) -> Option<u64> {
        self.read_slice_at(offset, 8)
            .and_then(|b| b.try_into().ok())
            .map(u64::from_le_bytes)
    }

    #[inline(always)]
    fn read_ptr_at(&self, offset: usize, is_64bit: bool) -> Option<u64> {
        if is_64bit {
            self.read_u64_le_at(offset)
        } else {
            self.read_u32_le_at(offset).map(u64::from)
        }
    }

    fn read_cstring_at(&self, offset: usize, max_len: usize) -> Option<&str> {
        let end = offset.saturating_add(max_len).min(self.len());
        let slice = self.get(offset..end)?;

        // Find null terminator
        let len = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
        std::str::from_utf8(&slice[..len]).ok()
    }

    #[inline(always)]
    fn read_slice_at(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.get(offset..end)
    }
}

/// Helper to read a null-terminated string from a buffer
pub fn read_cstring(data: &[u8], offset: usize, max_len: usize) -> Result<&str> {
    data.read_cstring_at(offset, max_len)
        .ok_or(PeError::InvalidString)
}

/// Check if a range is within bounds
#[inline(always)]
pub fn check_bounds(offset: usize, size: usize, data_len: usize) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= data_len => Ok(()),
        _ => Err(PeError::InvalidOffset { offset }),
    }
}

/// Convert a section name array to a printable string.
///
/// Non-printable bytes are escaped as `\xNN`.
pub fn section_name_to_string(name: &[u8; 8]) -> String {
    let end = name.iter().position(|&b| b == 0).unwrap_or(8);
    let mut out = String::with_capacity(end);
    for &b in &name[..end] {
        match b {
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_ext() {
        let data = b"Hello, World!\0Extra";

        assert_eq!(data.read_u8_at(0), Some(b'H'));
        assert_eq!(data.read_u8_at(100), None);

        let data = b"\x34\x12\x78\x56\x00\x00\x00\x00";
        assert_eq!(data.read_u16_le_at(0), Some(0x1234));
        assert_eq!(data.read_u32_le_at(0), Some(0x56781234));
        assert_eq!(data.read_u64_le_at(0), Some(0x56781234));
        assert_eq!(data.read_ptr_at(0, false), Some(0x56781234));
        assert_eq!(data.read_u64_le_at(1), None);

        let data = b"test\0string";
        assert_eq!(data.read_cstring_at(0, 10), Some("test"));
    }

    #[test]
    fn test_reads_near_usize_max_do_not_overflow() {
        let data = [0u8; 16];
        assert_eq!(data.read_u32_le_at(usize::MAX - 1), None);
        assert_eq!(data.read_slice_at(usize::MAX, 2), None);
        assert_eq!(data.read_cstring_at(usize::MAX, 8), None);
    }

    #[test]
    fn test_read_cstring() {
        let data = b"Hello\0World";
        assert_eq!(read_cstring(data, 0, 10).unwrap(), "Hello");
        assert_eq!(read_cstring(data, 6, 10).unwrap(), "World");

        // Test without null terminator
        let data = b"NoNull";
        assert_eq!(read_cstring(data, 0, 6).unwrap(), "NoNull");
    }

    #[test]
    fn test_check_bounds() {
        assert!(check_bounds(0, 10, 100).is_ok());
        assert!(check_bounds(90, 10, 100).is_ok());
        assert!(check_bounds(0, 100, 100).is_ok());

        assert!(check_bounds(95, 10, 100).is_err());
        assert!(check_bounds(101, 0, 100).is_err());
        assert!(check_bounds(0, 101, 100).is_err());
        assert!(check_bounds(usize::MAX, 2, 100).is_err());
    }

    #[test]
    fn test_section_name_to_string() {
        let mut name = [0u8; 8];
        name[0..5].copy_from_slice(b".text");
        assert_eq!(section_name_to_string(&name), ".text");

        name.copy_from_slice(b".textbss");
        assert_eq!(section_name_to_string(&name), ".textbss");

        name = [0u8; 8];
        assert_eq!(section_name_to_string(&name), "");

        name = *b"a\x01b\0\0\0\0\0";
        assert_eq!(section_name_to_string(&name), "a\\x01b");
    }
}
