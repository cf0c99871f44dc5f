//! Module identity and content hashing.
//!
//! Both hashes are BLAKE3 digests folded to 64 bits, little endian, so they
//! fit the address-sized values the rest of the debugger passes around.

fn fold(hash: blake3::Hash) -> u64 {
    let bytes = hash.as_bytes();
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Identity hash of a module file name (name plus extension).
///
/// Case-insensitive. Empty input hashes to zero.
pub fn name_hash(name: &str) -> u64 {
    if name.is_empty() {
        return 0;
    }
    let lower = name.to_lowercase();
    fold(blake3::hash(lower.as_bytes()))
}

/// Hash of a module's backing bytes
pub fn content_hash(data: &[u8]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(data);
    fold(hasher.finalize())
}
