//! # Cryptographic Primitives
//!
//! Hashing and hierarchical Ed25519 keys. Everything here is a thin,
//! type-safe layer over audited crates (`sha3`, `blake3`, `hmac`, `sha2`,
//! `curve25519-dalek`, `ed25519-dalek`).
//!
//! - **hash**: SHA3-256 content hashes, BLAKE3 pubkey hashes and
//!   domain-separated digests.
//! - **keys**: extended keys, derivation paths, public child derivation,
//!   signing and verification.

pub mod hash;
pub mod keys;

pub use hash::{blake3_hash, domain_separated_hash, pubkey_hash, sha3_256, tagged_sha3};
pub use keys::{
    derive_child, derive_path, derive_set, verify, DerivationPath, KeyError, Signature, XPrv,
    XPub,
};
