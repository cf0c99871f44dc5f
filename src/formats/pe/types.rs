//! Core PE data types and structures

use std::fmt;
use std::ops::Range;

// PE constants
pub const DOS_SIGNATURE: u16 = 0x5A4D; // MZ
pub const DOS_HEADER_SIZE: usize = 64;
pub const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";
pub const PE32_MAGIC: u16 = 0x10B;
pub const PE32PLUS_MAGIC: u16 = 0x20B;

// Data directory indices
pub const IMAGE_DIRECTORY_ENTRY_EXPORT: usize = 0;
pub const IMAGE_DIRECTORY_ENTRY_IMPORT: usize = 1;
pub const IMAGE_DIRECTORY_ENTRY_RESOURCE: usize = 2;
pub const IMAGE_DIRECTORY_ENTRY_EXCEPTION: usize = 3;
pub const IMAGE_DIRECTORY_ENTRY_SECURITY: usize = 4;
pub const IMAGE_DIRECTORY_ENTRY_BASERELOC: usize = 5;
pub const IMAGE_DIRECTORY_ENTRY_DEBUG: usize = 6;
pub const IMAGE_DIRECTORY_ENTRY_TLS: usize = 9;
pub const IMAGE_NUMBEROF_DIRECTORY_ENTRIES: usize = 16;

// File characteristics
pub const IMAGE_FILE_RELOCS_STRIPPED: u16 = 0x0001;
pub const IMAGE_FILE_EXECUTABLE_IMAGE: u16 = 0x0002;
pub const IMAGE_FILE_DLL: u16 = 0x2000;

// Section characteristics
pub const IMAGE_SCN_CNT_CODE: u32 = 0x00000020;
pub const IMAGE_SCN_MEM_EXECUTE: u32 = 0x20000000;
pub const IMAGE_SCN_MEM_READ: u32 = 0x40000000;
pub const IMAGE_SCN_MEM_WRITE: u32 = 0x80000000;

// Base relocation types
pub const IMAGE_REL_BASED_ABSOLUTE: u8 = 0;
pub const IMAGE_REL_BASED_HIGH: u8 = 1;
pub const IMAGE_REL_BASED_LOW: u8 = 2;
pub const IMAGE_REL_BASED_HIGHLOW: u8 = 3;
pub const IMAGE_REL_BASED_HIGHADJ: u8 = 4;
pub const IMAGE_REL_BASED_DIR64: u8 = 10;

// Debug directory types
pub const IMAGE_DEBUG_TYPE_UNKNOWN: u32 = 0;
pub const IMAGE_DEBUG_TYPE_COFF: u32 = 1;
pub const IMAGE_DEBUG_TYPE_CODEVIEW: u32 = 2;
pub const IMAGE_DEBUG_TYPE_FPO: u32 = 3;
pub const IMAGE_DEBUG_TYPE_MISC: u32 = 4;
pub const IMAGE_DEBUG_TYPE_EXCEPTION: u32 = 5;
pub const IMAGE_DEBUG_TYPE_FIXUP: u32 = 6;
pub const IMAGE_DEBUG_TYPE_OMAP_TO_SRC: u32 = 7;
pub const IMAGE_DEBUG_TYPE_OMAP_FROM_SRC: u32 = 8;
pub const IMAGE_DEBUG_TYPE_BORLAND: u32 = 9;
pub const IMAGE_DEBUG_TYPE_RESERVED10: u32 = 10;
pub const IMAGE_DEBUG_TYPE_CLSID: u32 = 11;

// CodeView signatures (little-endian magic)
pub const CV_SIGNATURE_NB10: u32 = u32::from_le_bytes(*b"NB10");
pub const CV_SIGNATURE_RSDS: u32 = u32::from_le_bytes(*b"RSDS");

/// PE parsing error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeError {
    InvalidDosSignature,
    InvalidPeSignature,
    InvalidMagic(u16),
    TruncatedHeader { expected: usize, actual: usize },
    InvalidRva { rva: u32 },
    InvalidOffset { offset: usize },
    MalformedDirectory {
        directory: &'static str,
        reason: String,
    },
    UnsupportedDebugType(u32),
    UnknownCodeViewSignature(u32),
    DataDirectoryNotFound { index: usize },
    LimitExceeded(&'static str),
    InvalidString,
}

impl PeError {
    pub(crate) fn malformed(directory: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedDirectory {
            directory,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for PeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDosSignature => write!(f, "Invalid DOS signature"),
            Self::InvalidPeSignature => write!(f, "Invalid PE signature"),
            Self::InvalidMagic(m) => write!(f, "Invalid optional header magic: 0x{:04x}", m),
            Self::TruncatedHeader { expected, actual } => {
                write!(
                    f,
                    "Truncated header: expected {} bytes, got {}",
                    expected, actual
                )
            }
            Self::InvalidRva { rva } => write!(f, "Invalid RVA: 0x{:08x}", rva),
            Self::InvalidOffset { offset } => write!(f, "Invalid file offset: 0x{:x}", offset),
            Self::MalformedDirectory { directory, reason } => {
                write!(f, "Malformed {} directory: {}", directory, reason)
            }
            Self::UnsupportedDebugType(t) => {
                write!(f, "Unsupported debug type {}", debug_type_name(*t))
            }
            Self::UnknownCodeViewSignature(s) => {
                write!(f, "Unknown debug directory signature {:08X}", s)
            }
            Self::DataDirectoryNotFound { index } => {
                write!(f, "Data directory {} not found", index)
            }
            Self::LimitExceeded(what) => write!(f, "Limit exceeded: {}", what),
            Self::InvalidString => write!(f, "Invalid string encoding"),
        }
    }
}

impl std::error::Error for PeError {}

pub type Result<T> = std::result::Result<T, PeError>;

/// Human readable name of a debug directory type
pub fn debug_type_name(debug_type: u32) -> &'static str {
    match debug_type {
        IMAGE_DEBUG_TYPE_UNKNOWN => "IMAGE_DEBUG_TYPE_UNKNOWN",
        IMAGE_DEBUG_TYPE_COFF => "IMAGE_DEBUG_TYPE_COFF",
        IMAGE_DEBUG_TYPE_CODEVIEW => "IMAGE_DEBUG_TYPE_CODEVIEW",
        IMAGE_DEBUG_TYPE_FPO => "IMAGE_DEBUG_TYPE_FPO",
        IMAGE_DEBUG_TYPE_MISC => "IMAGE_DEBUG_TYPE_MISC",
        IMAGE_DEBUG_TYPE_EXCEPTION => "IMAGE_DEBUG_TYPE_EXCEPTION",
        IMAGE_DEBUG_TYPE_FIXUP => "IMAGE_DEBUG_TYPE_FIXUP",
        IMAGE_DEBUG_TYPE_OMAP_TO_SRC => "IMAGE_DEBUG_TYPE_OMAP_TO_SRC",
        IMAGE_DEBUG_TYPE_OMAP_FROM_SRC => "IMAGE_DEBUG_TYPE_OMAP_FROM_SRC",
        IMAGE_DEBUG_TYPE_BORLAND => "IMAGE_DEBUG_TYPE_BORLAND",
        IMAGE_DEBUG_TYPE_RESERVED10 => "IMAGE_DEBUG_TYPE_RESERVED10",
        IMAGE_DEBUG_TYPE_CLSID => "IMAGE_DEBUG_TYPE_CLSID",
        _ => "unknown",
    }
}

/// How the bytes handed to the parser are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayout {
    /// Raw file contents; RVAs resolve through section raw-data pointers.
    File,
    /// Image as mapped by the OS loader (a copy of process memory); an RVA is
    /// the offset.
    Mapped,
}

/// DOS header fields the parser needs
#[derive(Debug, Clone, Copy)]
pub struct DosHeader {
    pub e_magic: u16,
    pub e_lfanew: u32,
}

/// COFF header (20 bytes)
#[derive(Debug, Clone, Copy)]
pub struct CoffHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

impl CoffHeader {
    pub fn is_dll(&self) -> bool {
        (self.characteristics & IMAGE_FILE_DLL) != 0
    }

    pub fn relocs_stripped(&self) -> bool {
        (self.characteristics & IMAGE_FILE_RELOCS_STRIPPED) != 0
    }
}

/// Data directory entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl DataDirectory {
    pub fn is_present(&self) -> bool {
        self.virtual_address != 0 && self.size != 0
    }
}

/// Optional header fields shared by PE32 and PE32+
#[derive(Debug, Clone)]
pub struct OptionalHeader {
    pub magic: u16,
    pub address_of_entry_point: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub dll_characteristics: u16,
    pub number_of_rva_and_sizes: u32,
}

impl OptionalHeader {
    pub fn is_64bit(&self) -> bool {
        self.magic == PE32PLUS_MAGIC
    }
}

/// NT headers (PE signature + COFF + Optional)
#[derive(Debug, Clone)]
pub struct NtHeaders {
    pub file_header: CoffHeader,
    pub optional_header: OptionalHeader,
}

/// Section header
#[derive(Debug, Clone)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub characteristics: u32,
}

impl SectionHeader {
    pub fn name(&self) -> String {
        crate::formats::pe::utils::section_name_to_string(&self.name)
    }

    /// Extent of the section in memory, falling back to the raw size when
    /// the virtual size is zero or smaller.
    pub fn mapped_size(&self) -> u32 {
        self.virtual_size.max(self.size_of_raw_data)
    }

    pub fn contains_rva(&self, rva: u32) -> bool {
        let end = u64::from(self.virtual_address) + u64::from(self.mapped_size());
        rva >= self.virtual_address && u64::from(rva) < end
    }

    pub fn is_executable(&self) -> bool {
        (self.characteristics & IMAGE_SCN_MEM_EXECUTE) != 0
    }

    pub fn is_readable(&self) -> bool {
        (self.characteristics & IMAGE_SCN_MEM_READ) != 0
    }

    pub fn is_writable(&self) -> bool {
        (self.characteristics & IMAGE_SCN_MEM_WRITE) != 0
    }

    pub fn contains_code(&self) -> bool {
        (self.characteristics & IMAGE_SCN_CNT_CODE) != 0
    }
}

/// Section with data reference
#[derive(Debug, Clone)]
pub struct Section {
    pub header: SectionHeader,
    pub data: Range<usize>, // Range in file
}

/// IMAGE_BASE_RELOCATION block header
#[derive(Debug, Clone, Copy)]
pub struct BaseRelocationBlock {
    pub virtual_address: u32,
    pub size_of_block: u32,
}

/// Parsed base relocation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseRelocation {
    pub rva: u32,
    pub kind: u8,
    pub size: u8,
}

/// IMAGE_DEBUG_DIRECTORY entry (28 bytes)
#[derive(Debug, Clone)]
pub struct DebugEntry {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub debug_type: u32,
    pub size_of_data: u32,
    pub address_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
}

/// CodeView record decoded from the debug directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeViewInfo {
    /// Canonical signature string used to match a symbol store entry
    pub signature: String,
    /// PDB file name embedded in the record
    pub pdb_file: String,
    /// Raw GUID bytes for RSDS records
    pub guid: Option<[u8; 16]>,
    pub age: u32,
}

/// TLS directory
#[derive(Debug, Clone)]
pub struct TlsDirectory {
    pub start_address_of_raw_data: u64,
    pub end_address_of_raw_data: u64,
    pub address_of_index: u64,
    pub address_of_callbacks: u64,
    pub size_of_zero_fill: u32,
    pub characteristics: u32,
}

/// Export entry
#[derive(Debug, Clone)]
pub struct ExportEntry<'a> {
    pub name: Option<&'a str>,
    pub ordinal: u32,
    pub rva: u32,
    pub forwarder: Option<&'a str>,
}

/// Parse options
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub max_exports: usize,
    pub max_relocations: usize,
    pub max_tls_callbacks: usize,
    pub max_name_len: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_exports: 10000,
            max_relocations: 1 << 20,
            max_tls_callbacks: 1024,
            max_name_len: 512,
        }
    }
}
