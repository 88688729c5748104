//! Deterministic request fingerprints used as [`super::MultiRequestContext`]
//! keys (spec §3/§4.J: "a logical request" coalesced by the layer clients).
//!
//! A fingerprint is a SHA-256 digest of its parts joined by a separator byte
//! that cannot appear inside any part (a request component is always
//! produced from `Debug`/ids, never raw user text), so two distinct part
//! lists never collide by concatenation alone.

use sha2::{Digest, Sha256};

/// Hashes `parts` into a stable hex-encoded fingerprint. Order matters:
/// callers must pass parts in a fixed, documented order for the fingerprint
/// to be reproducible across calls describing the same logical request.
pub fn compute(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_parts_produce_the_same_fingerprint() {
        let a = compute(&["get_data", "catalog-1", "layer-1", "partition-7"]);
        let b = compute(&["get_data", "catalog-1", "layer-1", "partition-7"]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_parts_produce_different_fingerprints() {
        let a = compute(&["get_data", "catalog-1", "layer-1", "partition-7"]);
        let b = compute(&["get_data", "catalog-1", "layer-1", "partition-8"]);
        assert_ne!(a, b);
    }

    #[test]
    fn concatenation_boundary_does_not_collide() {
        let a = compute(&["ab", "c"]);
        let b = compute(&["a", "bc"]);
        assert_ne!(a, b);
    }
}
