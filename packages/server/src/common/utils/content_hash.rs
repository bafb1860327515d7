use sha2::{Digest, Sha256};

/// SHA-256 of a raw request body, hex encoded.
///
/// No normalization: a redelivered webhook carries the exact same bytes, and
/// two distinct events must never collide because of whitespace.
pub fn body_content_hash(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}
