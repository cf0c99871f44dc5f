//! Core data types for the module registry.
//!
//! Address ranges, relocation entries and the module record that ties them
//! together.

pub mod address_range;
pub mod module;
pub mod relocation;

pub use address_range::AddressRange;
pub use module::{ModuleExport, ModuleImport, ModuleInfo, ModuleRecord, ModuleSection, TrustClass};
pub use relocation::{Relocation, RelocationKind};
