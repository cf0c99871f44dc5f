//! Configuration for the module registry.
//!
//! Every section has sensible defaults; a JSON document only needs to name
//! the fields it overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::formats::pe::ParseOptions;
use crate::io::IOLimits;

/// Errors raised while loading a configuration document
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Master configuration for the registry and its loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Identity and classification rules applied on load.
    pub loader: LoaderConfig,
    /// Limits for mapping files and copying process memory.
    pub io: IOLimits,
    /// Caps applied by the directory parsers.
    pub parsers: ParserConfig,
    /// Symbol provider selection.
    pub symbols: SymbolConfig,
}

impl RegistryConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Loader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// OS system directory; modules below it are classified as system.
    pub system_root: String,
    /// Path prefix marking a module that only exists in process memory.
    pub virtual_prefix: String,
    /// Emit entry point and export labels for virtual modules.
    pub synthesize_labels: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            system_root: default_system_root(),
            virtual_prefix: "virtual:\\".to_string(),
            synthesize_labels: true,
        }
    }
}

fn default_system_root() -> String {
    ["windir", "SystemRoot"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "C:\\Windows".to_string())
}

/// Parser limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Maximum number of export entries read from one image.
    pub max_exports: usize,
    /// Maximum number of base relocations kept per image.
    pub max_relocations: usize,
    /// Maximum number of TLS callbacks read before giving up.
    pub max_tls_callbacks: usize,
    /// Maximum length of any name string read from an image.
    pub max_name_len: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        let options = ParseOptions::default();
        Self {
            max_exports: options.max_exports,
            max_relocations: options.max_relocations,
            max_tls_callbacks: options.max_tls_callbacks,
            max_name_len: options.max_name_len,
        }
    }
}

impl ParserConfig {
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            max_exports: self.max_exports,
            max_relocations: self.max_relocations,
            max_tls_callbacks: self.max_tls_callbacks,
            max_name_len: self.max_name_len,
        }
    }
}

/// Symbol provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolConfig {
    /// Directories searched for a PDB when the embedded path does not exist.
    pub search_paths: Vec<PathBuf>,
    /// Load symbols on a background thread.
    pub load_async: bool,
    /// Reject a PDB whose GUID/age does not match the image's CodeView record.
    pub verify_signature: bool,
}

impl Default for SymbolConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            load_async: true,
            verify_signature: true,
        }
    }
}
