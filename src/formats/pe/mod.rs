//! PE image reader
//!
//! [`PeImage`] wraps a flat byte buffer holding either the on-disk file or a
//! copy of the image as the loader mapped it, and answers the questions the
//! directory parsers need: RVA resolution, section table, data directories.
//! Every RVA resolution is bounded by the buffer, so a resolved offset is
//! always safe to slice from.

use std::cell::OnceCell;

pub mod directories;
pub mod headers;
pub mod sections;
#[cfg(test)]
pub(crate) mod testutil;
pub mod types;
pub mod utils;

use directories::*;
use headers::*;
use sections::*;
pub use types::*;
use utils::*;

/// Parsed view over a PE image buffer
pub struct PeImage<'data> {
    data: &'data [u8],
    layout: ImageLayout,
    dos_header: DosHeader,
    nt_headers: NtHeaders,
    data_directories: Vec<DataDirectory>,
    section_table: SectionTable,
    options: ParseOptions,

    exports: OnceCell<ExportTable<'data>>,
}

impl<'data> PeImage<'data> {
    /// Parse headers and the section table with default limits
    pub fn parse(data: &'data [u8], layout: ImageLayout) -> Result<Self> {
        Self::with_options(data, layout, ParseOptions::default())
    }

    pub fn with_options(
        data: &'data [u8],
        layout: ImageLayout,
        options: ParseOptions,
    ) -> Result<Self> {
        let dos_header = parse_dos_header(data)?;
        let (nt_headers, data_directories, section_offset) =
            parse_nt_headers(data, dos_header.e_lfanew as usize)?;

        let section_headers = parse_section_headers(
            data,
            section_offset,
            nt_headers.file_header.number_of_sections,
        )?;
        let section_table = SectionTable::new(create_sections(section_headers));

        Ok(Self {
            data,
            layout,
            dos_header,
            nt_headers,
            data_directories,
            section_table,
            options,
            exports: OnceCell::new(),
        })
    }

    // Header access

    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    pub fn data(&self) -> &'data [u8] {
        self.data
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    pub fn dos_header(&self) -> &DosHeader {
        &self.dos_header
    }

    pub fn nt_headers(&self) -> &NtHeaders {
        &self.nt_headers
    }

    pub fn file_header(&self) -> &CoffHeader {
        &self.nt_headers.file_header
    }

    pub fn optional_header(&self) -> &OptionalHeader {
        &self.nt_headers.optional_header
    }

    /// COFF characteristics flags
    pub fn characteristics(&self) -> u16 {
        self.nt_headers.file_header.characteristics
    }

    pub fn is_64bit(&self) -> bool {
        self.nt_headers.optional_header.is_64bit()
    }

    pub fn is_dll(&self) -> bool {
        self.nt_headers.file_header.is_dll()
    }

    /// Entry point RVA as declared in the optional header
    pub fn entry_point(&self) -> u32 {
        self.nt_headers.optional_header.address_of_entry_point
    }

    /// Preferred load address
    pub fn image_base(&self) -> u64 {
        self.nt_headers.optional_header.image_base
    }

    pub fn size_of_image(&self) -> u32 {
        self.nt_headers.optional_header.size_of_image
    }

    // Sections

    /// Sections in declaration order
    pub fn sections(&self) -> &[Section] {
        self.section_table.sections()
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.section_table.section_by_name(name)
    }

    pub fn section_containing_rva(&self, rva: u32) -> Option<&Section> {
        self.section_table.section_containing_rva(rva)
    }

    // Directories

    pub fn data_directory(&self, index: usize) -> Result<&DataDirectory> {
        self.data_directories
            .get(index)
            .ok_or(PeError::DataDirectoryNotFound { index })
    }

    // RVA resolution

    /// Convert an RVA to a buffer offset. Only succeeds when the offset lies
    /// inside the buffer.
    pub fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        let offset = match self.layout {
            ImageLayout::Mapped => rva as usize,
            ImageLayout::File => self
                .section_table
                .rva_to_offset(rva, self.optional_header().size_of_headers)?,
        };
        (offset < self.data.len()).then_some(offset)
    }

    /// Convert an RVA to a buffer offset, requiring the whole `len`-byte span
    /// starting there to be inside the buffer.
    pub fn rva_range_to_offset(&self, rva: u32, len: usize) -> Option<usize> {
        let offset = self.rva_to_offset(rva)?;
        check_bounds(offset, len, self.data.len()).ok()?;
        Some(offset)
    }

    /// Read a NUL-terminated string at an RVA
    pub fn read_string_at_rva(&self, rva: u32) -> Result<&'data str> {
        let offset = self.rva_to_offset(rva).ok_or(PeError::InvalidRva { rva })?;
        read_cstring(self.data, offset, self.options.max_name_len)
    }

    // Directory parsers

    /// Base relocations sorted by RVA
    pub fn relocations(&self) -> Result<Vec<BaseRelocation>> {
        parse_relocations(self, &self.options)
    }

    /// TLS callbacks rebased onto `module_base`
    pub fn tls_callbacks(&self, module_base: u64) -> Result<Vec<u64>> {
        parse_tls_callbacks(self, module_base, &self.options)
    }

    /// CodeView record from the debug directory, if the image has one
    pub fn codeview(&self) -> Result<Option<CodeViewInfo>> {
        parse_debug_directory(self, &self.options)
    }

    /// Export table (lazy-loaded)
    pub fn exports(&self) -> Result<&ExportTable<'data>> {
        if let Some(exports) = self.exports.get() {
            return Ok(exports);
        }

        let exports = parse_exports(self, &self.options)?;
        Ok(self.exports.get_or_init(|| exports))
    }
}

impl std::fmt::Debug for PeImage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeImage")
            .field("layout", &self.layout)
            .field("len", &self.data.len())
            .field("is_64bit", &self.is_64bit())
            .field("sections", &self.section_table.len())
            .finish()
    }
}
