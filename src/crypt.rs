//! Cryptographic primitives used by the key space.

use sha2::{Digest, Sha256};

pub mod dsa;

/// Compute the SHA-256 digest of `data`.
pub fn sha256(data: impl AsRef<[u8]>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    hasher.finalize().into()
}
