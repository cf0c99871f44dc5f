//! Symbol sources owned by module records.
//!
//! A record always owns exactly one [`SymbolSource`]. It starts out `Empty`
//! and becomes `External` when a [`SymbolProviderFactory`] manages to attach a
//! provider. Providers may still be loading when the record is queried, so
//! the lifecycle surface is deliberately small: open, loading, cancel.

pub mod pdb;

use std::fmt;

use crate::error::{ModuleError, Result};
use crate::formats::pe::CodeViewInfo;

pub use self::pdb::{PdbSymbolFactory, PdbSymbolProvider};

/// A loaded (or loading) source of debug symbols for one module.
pub trait SymbolProvider: Send + Sync {
    /// Short provider name for logs and listings
    fn name(&self) -> &str;

    fn is_open(&self) -> bool;

    fn is_loading(&self) -> bool;

    /// Stop an in-flight load and wait for it to wind down.
    fn cancel_loading(&self);

    /// Number of symbols available so far
    fn symbol_count(&self) -> usize {
        0
    }

    /// Name of the symbol starting exactly at `rva`, if known
    fn symbol_at(&self, _rva: u32) -> Option<String> {
        None
    }
}

/// What a factory needs to know about the module being loaded
#[derive(Debug, Clone, Copy)]
pub struct SymbolRequest<'a> {
    pub module_path: &'a str,
    pub base: u64,
    pub size: u64,
    /// PDB path embedded in the image, empty when absent
    pub symbol_file: &'a str,
    pub codeview: Option<&'a CodeViewInfo>,
    pub is_virtual: bool,
}

/// Creates providers for freshly loaded modules.
pub trait SymbolProviderFactory: Send + Sync {
    fn attach(&self, request: &SymbolRequest<'_>) -> Result<Box<dyn SymbolProvider>>;
}

/// Factory that never attaches anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSymbols;

impl SymbolProviderFactory for NoSymbols {
    fn attach(&self, _request: &SymbolRequest<'_>) -> Result<Box<dyn SymbolProvider>> {
        Err(ModuleError::ProviderAttachFailed(
            "no symbol provider configured".to_string(),
        ))
    }
}

/// Symbol source exclusively owned by a module record
#[derive(Default)]
pub enum SymbolSource {
    #[default]
    Empty,
    External(Box<dyn SymbolProvider>),
}

impl SymbolSource {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_open(&self) -> bool {
        match self {
            Self::Empty => false,
            Self::External(p) => p.is_open(),
        }
    }

    pub fn is_loading(&self) -> bool {
        match self {
            Self::Empty => false,
            Self::External(p) => p.is_loading(),
        }
    }

    pub fn cancel_loading(&self) {
        if let Self::External(p) = self {
            p.cancel_loading();
        }
    }

    pub fn provider_name(&self) -> &str {
        match self {
            Self::Empty => "empty",
            Self::External(p) => p.name(),
        }
    }

    pub fn provider(&self) -> Option<&dyn SymbolProvider> {
        match self {
            Self::Empty => None,
            Self::External(p) => Some(p.as_ref()),
        }
    }

    /// Cancel any in-flight load and fall back to `Empty`
    pub fn release(&mut self) {
        if self.is_loading() {
            self.cancel_loading();
        }
        *self = Self::Empty;
    }
}

impl Drop for SymbolSource {
    fn drop(&mut self) {
        if self.is_loading() {
            self.cancel_loading();
        }
    }
}

impl fmt::Debug for SymbolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::External(p) => f
                .debug_struct("External")
                .field("name", &p.name())
                .field("open", &p.is_open())
                .field("loading", &p.is_loading())
                .finish(),
        }
    }
}
