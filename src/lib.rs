//! Module registry and PE introspection for a native debugger.
//!
//! When the target loads an image, [`ModuleLoader`] maps or snapshots it,
//! extracts sections, relocations, TLS callbacks, exports and the CodeView
//! record, attaches a symbol provider and stores the result in a
//! [`ModuleRegistry`]. Everything else in the debugger asks the registry
//! address- or name-keyed questions.

/// Registry configuration
pub mod config;
/// Core data types module
pub mod core;
pub mod disasm;
pub mod error;
/// Expression-language helpers
pub mod expr;
pub mod formats;
pub mod hashing;
pub mod io;
pub mod logging;
pub mod memory;
pub mod modules;
pub mod symbols;

pub use crate::config::RegistryConfig;
pub use crate::core::{ModuleInfo, ModuleRecord, TrustClass};
pub use crate::error::{ModuleError, Result};
pub use crate::modules::{ModuleLoader, ModuleRegistry};
