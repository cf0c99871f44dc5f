//! Module registry, loader and query facade.

pub mod loader;
pub mod query;
pub mod registry;

pub use loader::{split_module_path, ModuleLoader, ENTRY_POINT_LABEL};
pub use query::find_by_name;
pub use registry::{ModuleMap, ModuleRegistry, Rejected};
