//! # Hashing Utilities
//!
//! Every digest in the ledger comes from one of two hash functions:
//!
//! - **SHA3-256**: content addressing. Output commitments, transaction ids
//!   and output ids are SHA3-256 digests, so any independent implementation
//!   with a stock SHA3 can reproduce them byte for byte.
//!
//! - **BLAKE3**: internal bookkeeping that never leaves this protocol family:
//!   pubkey hashes inside control programs and the per-input signature hash.
//!   The signature hash uses BLAKE3's `derive_key` mode for domain
//!   separation.
//!
//! ## Tagged hashing
//!
//! Ids that share the SHA3 function are separated by a short ASCII tag fed
//! ahead of the payload (see [`tagged_sha3`]). The tags live in
//! [`crate::config`] next to the other consensus constants.

use sha3::{Digest, Sha3_256};

/// Length of a pubkey hash as embedded in pay-to-pubkey-hash programs.
pub const PUBKEY_HASH_LENGTH: usize = 20;

/// Compute the SHA3-256 hash of the input data.
///
/// # Example
///
/// ```
/// use tessera_protocol::crypto::sha3_256;
///
/// let digest = sha3_256(b"");
/// assert_eq!(
///     hex::encode(digest),
///     "a7ffc6f8bf1ed76651c14756a061d662f580ff4de43b49fa82d80a4b80f8434a"
/// );
/// ```
pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// SHA3-256 over `tag || part_0 || part_1 || ...` without concatenating
/// into a temporary buffer.
///
/// The tag is a fixed ASCII string per id kind, so a transaction id can
/// never be confused with an output id even when the payload bytes are
/// identical.
pub fn tagged_sha3(tag: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(tag);
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Compute the BLAKE3 hash of the input data.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Compute a domain-separated hash using BLAKE3 with a context string.
///
/// This uses BLAKE3's built-in `derive_key` mode. The context string is
/// mixed into the IV, so two contexts cannot collide even on equal data.
pub fn domain_separated_hash(context: &str, data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Domain-separated BLAKE3 over several parts fed in order.
pub fn domain_separated_hash_multi(context: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// The 20-byte pubkey hash committed to by pay-to-pubkey-hash programs
/// and addresses: BLAKE3 truncated to its first 20 bytes.
///
/// This is also what `OP_HASH160` computes inside the VM, so the address
/// a message verifier recomputes and the program the validator executes
/// agree by construction.
pub fn pubkey_hash(public_key: &[u8]) -> [u8; PUBKEY_HASH_LENGTH] {
    let digest = blake3_hash(public_key);
    let mut output = [0u8; PUBKEY_HASH_LENGTH];
    output.copy_from_slice(&digest[..PUBKEY_HASH_LENGTH]);
    output
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha3_known_vector() {
        assert_eq!(
            hex::encode(sha3_256(b"abc")),
            "3a985da74fe225b2045c172d6bd390bd855f086e3e9d525b46bfe24511431532"
        );
    }

    #[test]
    fn tagged_sha3_equals_prefixed_hash() {
        let tagged = tagged_sha3(b"tag", &[b"hello", b" ", b"world"]);
        assert_eq!(tagged, sha3_256(b"taghello world"));
    }

    #[test]
    fn different_tags_differ() {
        assert_ne!(tagged_sha3(b"a", &[b"data"]), tagged_sha3(b"b", &[b"data"]));
    }

    #[test]
    fn domain_separation_works() {
        let data = b"same data";
        assert_ne!(
            domain_separated_hash("context-a", data),
            domain_separated_hash("context-b", data)
        );
    }

    #[test]
    fn multi_part_domain_hash_matches_concatenation() {
        let joined = domain_separated_hash("ctx", b"abcdef");
        let parts = domain_separated_hash_multi("ctx", &[b"ab", b"cd", b"ef"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn pubkey_hash_is_truncated_blake3() {
        let pk = [7u8; 32];
        let h = pubkey_hash(&pk);
        assert_eq!(h.len(), PUBKEY_HASH_LENGTH);
        assert_eq!(&h[..], &blake3_hash(&pk)[..20]);
    }
}
