//! Synthetic PE images for tests.
//!
//! Only depends on `std` so integration tests can pull it in with `#[path]`.
#![allow(dead_code)]

pub const HEADERS_SIZE: u32 = 0x400;
pub const TEXT_RVA: u32 = 0x1000;
pub const TEXT_RAW: u32 = 0x400;
pub const TEXT_RAW_SIZE: u32 = 0x200;
pub const DATA_RVA: u32 = 0x2000;
pub const DATA_RAW: u32 = 0x600;

const E_LFANEW: usize = 0x80;
const SECTION_ALIGNMENT: u32 = 0x1000;
const FILE_ALIGNMENT: u32 = 0x200;

const IMAGE_SCN_CNT_CODE: u32 = 0x0000_0020;
const IMAGE_SCN_CNT_INITIALIZED_DATA: u32 = 0x0000_0040;
const IMAGE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;
const IMAGE_SCN_MEM_READ: u32 = 0x4000_0000;

fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

fn put_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut [u8], at: usize, v: u64) {
    buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

/// Builder for a two-section image: `.text` (a page of `ret`s) followed by
/// `.rdata`, which holds every blob added through [`PeFixture::put_data`].
#[derive(Debug, Clone)]
pub struct PeFixture {
    pub is_64bit: bool,
    pub characteristics: u16,
    pub entry_point: u32,
    pub image_base: u64,
    /// Overrides the computed SizeOfImage when set
    pub size_of_image: Option<u32>,
    directories: [(u32, u32); 16],
    payload: Vec<u8>,
}

impl PeFixture {
    pub fn new32() -> Self {
        Self::new(false)
    }

    pub fn new64() -> Self {
        Self::new(true)
    }

    fn new(is_64bit: bool) -> Self {
        Self {
            is_64bit,
            characteristics: 0,
            entry_point: TEXT_RVA,
            image_base: if is_64bit { 0x1_4000_0000 } else { 0x40_0000 },
            size_of_image: None,
            directories: [(0, 0); 16],
            payload: Vec::new(),
        }
    }

    /// RVA the next `put_data` call will place its bytes at
    pub fn next_rva(&self) -> u32 {
        DATA_RVA + align_up(self.payload.len() as u32, 8)
    }

    /// Append a blob to `.rdata`, returning its RVA
    pub fn put_data(&mut self, bytes: &[u8]) -> u32 {
        let rva = self.next_rva();
        self.payload.resize((rva - DATA_RVA) as usize, 0);
        self.payload.extend_from_slice(bytes);
        rva
    }

    /// Append a blob and point data directory `index` at it
    pub fn put_directory(&mut self, index: usize, bytes: &[u8]) -> u32 {
        let rva = self.put_data(bytes);
        self.set_directory(index, rva, bytes.len() as u32);
        rva
    }

    pub fn set_directory(&mut self, index: usize, rva: u32, size: u32) {
        self.directories[index] = (rva, size);
    }

    /// File offset of an RVA inside `.rdata` in the file layout
    pub fn file_offset(rva: u32) -> usize {
        (DATA_RAW + (rva - DATA_RVA)) as usize
    }

    /// Add a TLS directory whose callback array holds `callbacks` (absolute
    /// VAs against the preferred image base), zero terminated.
    pub fn with_tls_callbacks(&mut self, callbacks: &[u64]) -> &mut Self {
        let mut array = Vec::new();
        for &cb in callbacks.iter().chain(std::iter::once(&0)) {
            if self.is_64bit {
                array.extend_from_slice(&cb.to_le_bytes());
            } else {
                array.extend_from_slice(&(cb as u32).to_le_bytes());
            }
        }
        let array_rva = self.put_data(&array);
        let array_va = self.image_base + u64::from(array_rva);

        let dir = if self.is_64bit {
            let mut d = vec![0u8; 40];
            put_u64(&mut d, 24, array_va);
            d
        } else {
            let mut d = vec![0u8; 24];
            put_u32(&mut d, 12, array_va as u32);
            d
        };
        self.put_directory(9, &dir);
        self
    }

    /// Add a single debug directory entry of `debug_type` over `data`
    pub fn with_debug_entry(&mut self, debug_type: u32, data: &[u8]) -> &mut Self {
        let data_rva = self.put_data(data);
        let mut entry = vec![0u8; 28];
        put_u32(&mut entry, 12, debug_type);
        put_u32(&mut entry, 16, data.len() as u32);
        put_u32(&mut entry, 20, data_rva);
        put_u32(&mut entry, 24, Self::file_offset(data_rva) as u32);
        self.put_directory(6, &entry);
        self
    }

    /// Add a CodeView RSDS record
    pub fn with_rsds(&mut self, guid: [u8; 16], age: u32, pdb: &str) -> &mut Self {
        let mut cv = b"RSDS".to_vec();
        cv.extend_from_slice(&guid);
        cv.extend_from_slice(&age.to_le_bytes());
        cv.extend_from_slice(pdb.as_bytes());
        cv.push(0);
        self.with_debug_entry(2, &cv)
    }

    /// Add a CodeView NB10 record
    pub fn with_nb10(&mut self, signature: u32, age: u32, pdb: &str) -> &mut Self {
        let mut cv = b"NB10".to_vec();
        cv.extend_from_slice(&0u32.to_le_bytes());
        cv.extend_from_slice(&signature.to_le_bytes());
        cv.extend_from_slice(&age.to_le_bytes());
        cv.extend_from_slice(pdb.as_bytes());
        cv.push(0);
        self.with_debug_entry(2, &cv)
    }

    /// Add an export directory. `exports` map names to RVAs; `forwards` map
    /// names to forwarder strings such as `"NTDLL.RtlAllocateHeap"`.
    pub fn with_exports(
        &mut self,
        dll_name: &str,
        exports: &[(&str, u32)],
        forwards: &[(&str, &str)],
    ) -> &mut Self {
        let base = self.next_rva();
        let count = exports.len() + forwards.len();

        let functions_at = 40usize;
        let names_at = functions_at + 4 * count;
        let ordinals_at = names_at + 4 * count;
        let mut strings_at = ordinals_at + 2 * count;

        let mut blob = vec![0u8; strings_at];
        let push_str = |blob: &mut Vec<u8>, s: &str, at: &mut usize| -> u32 {
            let rva = base + *at as u32;
            blob.extend_from_slice(s.as_bytes());
            blob.push(0);
            *at += s.len() + 1;
            rva
        };

        let dll_rva = push_str(&mut blob, dll_name, &mut strings_at);
        put_u32(&mut blob, 12, dll_rva);
        put_u32(&mut blob, 16, 1);
        put_u32(&mut blob, 20, count as u32);
        put_u32(&mut blob, 24, count as u32);
        put_u32(&mut blob, 28, base + functions_at as u32);
        put_u32(&mut blob, 32, base + names_at as u32);
        put_u32(&mut blob, 36, base + ordinals_at as u32);

        let mut index = 0usize;
        for &(name, rva) in exports {
            let name_rva = push_str(&mut blob, name, &mut strings_at);
            put_u32(&mut blob, functions_at + 4 * index, rva);
            put_u32(&mut blob, names_at + 4 * index, name_rva);
            put_u16(&mut blob, ordinals_at + 2 * index, index as u16);
            index += 1;
        }
        for &(name, target) in forwards {
            let name_rva = push_str(&mut blob, name, &mut strings_at);
            let target_rva = push_str(&mut blob, target, &mut strings_at);
            put_u32(&mut blob, functions_at + 4 * index, target_rva);
            put_u32(&mut blob, names_at + 4 * index, name_rva);
            put_u16(&mut blob, ordinals_at + 2 * index, index as u16);
            index += 1;
        }

        self.put_directory(0, &blob);
        self
    }

    /// Add a base relocation directory made of `(page_rva, entries)` blocks
    pub fn with_relocations(&mut self, blocks: &[(u32, &[u16])]) -> &mut Self {
        let mut table = Vec::new();
        for &(page, entries) in blocks {
            table.extend_from_slice(&page.to_le_bytes());
            table.extend_from_slice(&((8 + entries.len() * 2) as u32).to_le_bytes());
            for e in entries {
                table.extend_from_slice(&e.to_le_bytes());
            }
        }
        self.put_directory(5, &table);
        self
    }

    fn data_virtual_size(&self) -> u32 {
        (self.payload.len() as u32).max(1)
    }

    fn data_raw_size(&self) -> u32 {
        align_up(self.data_virtual_size(), FILE_ALIGNMENT)
    }

    pub fn computed_size_of_image(&self) -> u32 {
        DATA_RVA + align_up(self.data_virtual_size(), SECTION_ALIGNMENT)
    }

    fn headers(&self) -> Vec<u8> {
        let mut h = vec![0u8; HEADERS_SIZE as usize];
        h[0] = b'M';
        h[1] = b'Z';
        put_u32(&mut h, 60, E_LFANEW as u32);
        h[E_LFANEW..E_LFANEW + 4].copy_from_slice(b"PE\0\0");

        let coff = E_LFANEW + 4;
        let opt_size: u16 = if self.is_64bit { 0xF0 } else { 0xE0 };
        put_u16(&mut h, coff, if self.is_64bit { 0x8664 } else { 0x014C });
        put_u16(&mut h, coff + 2, 2);
        put_u16(&mut h, coff + 16, opt_size);
        put_u16(&mut h, coff + 18, 0x0002 | self.characteristics);

        let opt = coff + 20;
        put_u16(&mut h, opt, if self.is_64bit { 0x20B } else { 0x10B });
        put_u32(&mut h, opt + 16, self.entry_point);
        if self.is_64bit {
            put_u64(&mut h, opt + 24, self.image_base);
        } else {
            put_u32(&mut h, opt + 28, self.image_base as u32);
        }
        put_u32(&mut h, opt + 32, SECTION_ALIGNMENT);
        put_u32(&mut h, opt + 36, FILE_ALIGNMENT);
        put_u32(
            &mut h,
            opt + 56,
            self.size_of_image
                .unwrap_or_else(|| self.computed_size_of_image()),
        );
        put_u32(&mut h, opt + 60, HEADERS_SIZE);

        let dirs = opt + if self.is_64bit { 112 } else { 96 };
        put_u32(&mut h, dirs - 4, 16);
        for (i, &(rva, size)) in self.directories.iter().enumerate() {
            put_u32(&mut h, dirs + 8 * i, rva);
            put_u32(&mut h, dirs + 8 * i + 4, size);
        }

        let table = opt + opt_size as usize;
        let text = table;
        h[text..text + 5].copy_from_slice(b".text");
        put_u32(&mut h, text + 8, SECTION_ALIGNMENT);
        put_u32(&mut h, text + 12, TEXT_RVA);
        put_u32(&mut h, text + 16, TEXT_RAW_SIZE);
        put_u32(&mut h, text + 20, TEXT_RAW);
        put_u32(
            &mut h,
            text + 36,
            IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_MEM_READ,
        );

        let rdata = table + 40;
        h[rdata..rdata + 6].copy_from_slice(b".rdata");
        put_u32(&mut h, rdata + 8, self.data_virtual_size());
        put_u32(&mut h, rdata + 12, DATA_RVA);
        put_u32(&mut h, rdata + 16, self.data_raw_size());
        put_u32(&mut h, rdata + 20, DATA_RAW);
        put_u32(
            &mut h,
            rdata + 36,
            IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ,
        );
        h
    }

    /// On-disk layout
    pub fn build(&self) -> Vec<u8> {
        let mut out = self.headers();
        out.resize((TEXT_RAW + TEXT_RAW_SIZE) as usize, 0xC3);
        out.extend_from_slice(&self.payload);
        out.resize((DATA_RAW + self.data_raw_size()) as usize, 0);
        out
    }

    /// Layout as the OS loader maps it: every section at its RVA
    pub fn build_mapped(&self) -> Vec<u8> {
        let mut out = self.headers();
        out.resize(TEXT_RVA as usize, 0);
        out.resize((TEXT_RVA + TEXT_RAW_SIZE) as usize, 0xC3);
        out.resize(DATA_RVA as usize, 0);
        out.extend_from_slice(&self.payload);
        out.resize(self.computed_size_of_image() as usize, 0);
        out
    }
}
