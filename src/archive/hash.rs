use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `input`.
pub fn compute_hash(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// First `len` hex characters of the digest, used in file names.
pub fn short_hash(input: &[u8], len: usize) -> String {
    let mut hash = compute_hash(input);
    hash.truncate(len);
    hash
}
