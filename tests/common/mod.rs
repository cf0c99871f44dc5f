//! Common test utilities and helpers.
//!
//! Synthetic PE images come from the same builder the unit tests use; the
//! rest are recorders and fakes for the loader's collaborators.
#![allow(dead_code)]

#[path = "../../src/formats/pe/testutil.rs"]
pub mod pe_fixture;
pub mod test_utils;

pub use pe_fixture::PeFixture;
pub use test_utils::*;

/// Common test data and constants
pub mod test_data {
    /// Base used by the system-directory example
    pub const SYSTEM_BASE: u64 = 0x1000_0000;
    pub const SYSTEM_SIZE: u64 = 0x2000;
    pub const SYSTEM_ROOT: &str = "C:\\Windows";
    pub const SYSTEM_DLL: &str = "C:\\Windows\\System32\\foo.dll";

    /// Base used for modules loaded from synthesized files
    pub const FILE_BASE: u64 = 0x7FF6_0000_0000;
    /// Base used for modules that only exist in target memory
    pub const VIRTUAL_BASE: u64 = 0x2000_0000;
}
