//! Data directory parsers

pub mod debug;
pub mod export;
pub mod relocation;
pub mod tls;

pub use debug::parse_debug_directory;
pub use export::{parse_exports, ExportTable};
pub use relocation::parse_relocations;
pub use tls::parse_tls_callbacks;
