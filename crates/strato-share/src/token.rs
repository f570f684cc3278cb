//! Share-token generation and verification primitives.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generate a fresh share token: `(raw, hash)`.
///
/// The raw token is 32 random bytes as 64 hex characters and is handed to
/// the caller exactly once; only the SHA-256 hex hash is ever stored.
pub fn generate_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let raw = hex::encode(bytes);
    let hash = hash_token(&raw);
    (raw, hash)
}

/// SHA-256 hex digest of a raw token.
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Constant-time string comparison; used for hash-against-hash checks so
/// lookup timing leaks nothing about stored values.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}
