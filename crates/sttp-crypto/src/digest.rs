//! SHA-256 digest for chest integrity tags.

use sha2::{Digest as _, Sha256};

/// Size of a chest digest in bytes (SHA-256 output).
pub const DIGEST_LEN: usize = 32;

/// Compute the integrity digest of `bytes`.
///
/// Deterministic and collision-resistant; no side effects. The digest always
/// covers a full payload buffer, stale trailing bytes included, so sender
/// and receiver hash identical input.
pub fn digest(bytes: &[u8]) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&Sha256::digest(bytes));
    out
}
