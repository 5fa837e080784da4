use sha2::{Digest, Sha256};

/// Number of hex characters shown when a fingerprint is abbreviated.
pub const SHORT_HASH_LEN: usize = 7;

/// Compute the SHA-256 hash of a byte slice, returning a lowercase hex string.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Abbreviate a hex fingerprint for display.
pub fn short_hash(hash: &str) -> &str {
    let end = hash
        .char_indices()
        .nth(SHORT_HASH_LEN)
        .map(|(i, _)| i)
        .unwrap_or(hash.len());
    &hash[..end]
}
