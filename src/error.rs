//! Error types for the module registry.
//!
//! Only `InvalidArgument`, `NotFound` and `DuplicateRange` ever reach callers
//! of the loader. Format problems are absorbed during a load and degrade the
//! affected field to empty.

use thiserror::Error;

use crate::formats::pe::PeError;
use crate::io::error::IoError;

/// Main error type for registry operations.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Zero base or size, or an empty path
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// No module contains the address, or the name/hash is unknown
    #[error("No module at {0:#x}")]
    NotFound(u64),

    /// A PE directory is present but structurally invalid
    #[error("Malformed {directory} directory: {reason}")]
    MalformedDirectory {
        directory: &'static str,
        reason: String,
    },

    /// Recognized but unhandled debug-directory type
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Insert overlaps an existing module
    #[error("Range {start:#x}..{end:#x} overlaps module at {existing:#x}")]
    DuplicateRange { start: u64, end: u64, existing: u64 },

    /// A symbol provider could not be attached
    #[error("Symbol provider attach failed: {0}")]
    ProviderAttachFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("PE error: {0}")]
    Pe(PeError),
}

impl From<PeError> for ModuleError {
    fn from(err: PeError) -> Self {
        match err {
            PeError::MalformedDirectory { directory, reason } => {
                Self::MalformedDirectory { directory, reason }
            }
            PeError::UnsupportedDebugType(_) => Self::UnsupportedFormat(err.to_string()),
            other => Self::Pe(other),
        }
    }
}

impl From<std::io::Error> for ModuleError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(IoError::StdIo(err))
    }
}

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, ModuleError>;
