use bitcoin::hashes::{sha256, Hash};

/// Compute sha256 hash of bytes
pub fn sha256sum(bytes: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(bytes).to_byte_array()
}
