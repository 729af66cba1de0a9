//! Block hashing: SHA-256 hex digests and the reserved sentinel values

use sha2::{Digest, Sha256};

/// Hash-list entry marking a deleted file. A metadata record whose hash
/// list is exactly this one element is a tombstone.
pub const TOMBSTONE_HASH: &str = "0";

/// Hash-list entry marking a zero-length file.
pub const EMPTYFILE_HASH: &str = "-1";

/// Name of the local index file inside a base directory. Never synced.
pub const INDEX_FILENAME: &str = "index.db";

/// SHA-256 digest of a block's bytes.
#[must_use]
pub fn block_hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 digest of a block's bytes as a lowercase hex string.
///
/// This string is the block's content address everywhere: in hash lists,
/// on the wire, and as the key into the sharding ring.
#[must_use]
pub fn block_hash_string(data: &[u8]) -> String {
    hex::encode(block_hash_bytes(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // SHA-256 of the empty string
        assert_eq!(
            block_hash_string(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_digest_shape() {
        let hash = block_hash_string(b"some block payload");
        assert_eq!(hash.len(), 64);
        assert!(hash
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(block_hash_string(b"abc"), block_hash_string(b"abc"));
        assert_ne!(block_hash_string(b"abc"), block_hash_string(b"abd"));
    }

    #[test]
    fn test_sentinels_cannot_collide_with_digests() {
        // Sentinels are shorter than any real digest
        assert_ne!(TOMBSTONE_HASH.len(), 64);
        assert_ne!(EMPTYFILE_HASH.len(), 64);
        assert_ne!(TOMBSTONE_HASH, EMPTYFILE_HASH);
    }
}
