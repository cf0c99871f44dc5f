//! Bounded access to module image bytes.
//!
//! [`FileMapping`] memory-maps an on-disk image read-only and enforces the
//! size limits in [`IOLimits`]. Virtual modules never touch this module; their
//! bytes come from [`crate::memory::TargetMemory`].

pub mod error;

use crate::io::error::{IoError, Result};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Resource limits applied when reading module images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IOLimits {
    /// The absolute maximum file size that can be mapped.
    pub max_file_size: u64,
    /// The maximum number of bytes copied out of the target for a virtual module.
    pub max_snapshot_size: u64,
}

impl Default for IOLimits {
    fn default() -> Self {
        Self {
            max_file_size: 512 * 1024 * 1024, // 512MB
            max_snapshot_size: 256 * 1024 * 1024,
        }
    }
}

/// A read-only memory map of a module file.
///
/// The mapping stays valid for as long as the value lives; dropping it
/// unmaps the file.
pub struct FileMapping {
    path: PathBuf,
    // None when the file size is zero; memmap cannot map empty files.
    mmap: Option<Mmap>,
}

impl FileMapping {
    /// Opens a file and memory-maps it read-only.
    ///
    /// Fails if the file cannot be opened or its size exceeds
    /// `limits.max_file_size`.
    pub fn open<P: AsRef<Path>>(path: P, limits: &IOLimits) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        debug!(
            path = %path.display(),
            size = file_size,
            limits.max_file_size = limits.max_file_size,
            "mapping module file"
        );

        if file_size > limits.max_file_size {
            warn!(
                path = %path.display(),
                size = file_size,
                limit = limits.max_file_size,
                "module file is too large"
            );
            return Err(IoError::FileTooLarge {
                limit: limits.max_file_size,
                found: file_size,
            });
        }

        let mmap = if file_size == 0 {
            None
        } else {
            // Safety: read-only map of a regular file; the map owns its view and
            // outlives every slice handed out through `bytes()`.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mapped bytes, empty for an empty file
    pub fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for FileMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMapping")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}
