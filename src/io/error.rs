//! Custom error types for the I/O module.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("File size of {found} bytes exceeds the maximum allowed size of {limit} bytes.")]
    FileTooLarge { limit: u64, found: u64 },

    #[error("Snapshot of {requested} bytes exceeds the limit of {limit} bytes.")]
    SnapshotTooLarge { limit: u64, requested: u64 },

    #[error("Target memory at {address:#x} ({len} bytes) is not readable.")]
    UnreadableMemory { address: u64, len: usize },

    #[error("An underlying I/O error occurred.")]
    StdIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IoError>;
