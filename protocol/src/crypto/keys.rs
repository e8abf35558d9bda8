//! # Hierarchical Key Derivation
//!
//! Extended Ed25519 keys with public (non-hardened) child derivation.
//!
//! An extended public key ([`XPub`]) is a compressed Edwards point plus a
//! 32-byte chain code. Any party holding only an `XPub` can derive the same
//! child public keys as the holder of the matching [`XPrv`], which is what
//! lets watch-only verifiers and independent signing sessions agree on the
//! derived keys without talking to each other.
//!
//! ## Child derivation
//!
//! ```text
//! h     = HMAC-SHA512(key = chain_code, "N" || public_key || le32(index))
//! f     = prune(h[0..32])
//! P'    = P + f·B            (public child)
//! k'    = k + f  (mod l)     (private child, same P')
//! cc'   = h[32..64]
//! ```
//!
//! Every key in the hierarchy is derived this way. There is no hardened
//! derivation, so the public half of the tree is always reproducible.
//!
//! ## Validity
//!
//! An `XPub` can only be constructed from bytes that decode to a canonical
//! curve point. Derivation is therefore total: it never fails and never
//! needs to return a `Result`.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::hazmat::{raw_sign, ExpandedSecretKey};
use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

type HmacSha512 = Hmac<Sha512>;

/// Serialized `XPub` length: public key (32) followed by chain code (32).
pub const XPUB_LENGTH: usize = 64;

/// Ed25519 signature length.
pub const SIGNATURE_LENGTH: usize = 64;

/// Raw public key length.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Errors that can occur while parsing key material or signatures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("invalid public key: not a canonical Ed25519 point")]
    InvalidPublicKey,

    #[error("invalid hex encoding")]
    InvalidHex,
}

// ---------------------------------------------------------------------------
// DerivationPath
// ---------------------------------------------------------------------------

/// An ordered sequence of unsigned 32-bit child indices.
///
/// Each index is fed to the child derivation as its 4-byte little-endian
/// encoding. Paths are plain values; cloning one is how it travels between
/// signing sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivationPath(Vec<u32>);

impl DerivationPath {
    /// Creates a path from its indices, outermost first.
    pub fn new(indices: Vec<u32>) -> Self {
        Self(indices)
    }

    /// The indices in derivation order.
    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    /// Number of derivation steps.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` for the empty path, which derives the key itself.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a new path extended by one index.
    pub fn child(&self, index: u32) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }
}

impl From<Vec<u32>> for DerivationPath {
    fn from(indices: Vec<u32>) -> Self {
        Self(indices)
    }
}

impl From<&[u32]> for DerivationPath {
    fn from(indices: &[u32]) -> Self {
        Self(indices.to_vec())
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for index in &self.0 {
            write!(f, "/{}", index)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// A 64-byte Ed25519 signature. Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signature([u8; SIGNATURE_LENGTH]);

impl Signature {
    /// Wraps raw signature bytes, checking the length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(KeyError::InvalidLength {
                expected: SIGNATURE_LENGTH,
                got: bytes.len(),
            });
        }
        let mut arr = [0u8; SIGNATURE_LENGTH];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Parses a hex-encoded signature.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidHex)?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl TryFrom<String> for Signature {
    type Error = KeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<Signature> for String {
    fn from(sig: Signature) -> Self {
        sig.to_hex()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// XPub
// ---------------------------------------------------------------------------

/// An extended public key: `public_key (32) || chain_code (32)`.
///
/// Holds the decompressed point alongside the bytes so derivation never has
/// to re-validate. Equality, ordering and hashing use the bytes only.
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct XPub {
    point: EdwardsPoint,
    bytes: [u8; XPUB_LENGTH],
}

impl XPub {
    /// Parses a 64-byte extended public key.
    ///
    /// Rejects anything whose first 32 bytes are not the canonical encoding
    /// of a point on the curve.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != XPUB_LENGTH {
            return Err(KeyError::InvalidLength {
                expected: XPUB_LENGTH,
                got: bytes.len(),
            });
        }
        let mut compressed = [0u8; PUBLIC_KEY_LENGTH];
        compressed.copy_from_slice(&bytes[..PUBLIC_KEY_LENGTH]);
        let point = CompressedEdwardsY(compressed)
            .decompress()
            .ok_or(KeyError::InvalidPublicKey)?;
        if point.compress().to_bytes() != compressed {
            return Err(KeyError::InvalidPublicKey);
        }
        let mut arr = [0u8; XPUB_LENGTH];
        arr.copy_from_slice(bytes);
        Ok(Self { point, bytes: arr })
    }

    /// Parses a hex-encoded extended public key.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(|_| KeyError::InvalidHex)?;
        Self::from_bytes(&bytes)
    }

    fn from_point(point: EdwardsPoint, chain_code: [u8; 32]) -> Self {
        let mut bytes = [0u8; XPUB_LENGTH];
        bytes[..PUBLIC_KEY_LENGTH].copy_from_slice(&point.compress().to_bytes());
        bytes[PUBLIC_KEY_LENGTH..].copy_from_slice(&chain_code);
        Self { point, bytes }
    }

    /// The raw 32-byte Ed25519 public key.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        let mut pk = [0u8; PUBLIC_KEY_LENGTH];
        pk.copy_from_slice(&self.bytes[..PUBLIC_KEY_LENGTH]);
        pk
    }

    pub fn chain_code(&self) -> [u8; 32] {
        let mut cc = [0u8; 32];
        cc.copy_from_slice(&self.bytes[PUBLIC_KEY_LENGTH..]);
        cc
    }

    pub fn as_bytes(&self) -> &[u8; XPUB_LENGTH] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Derives the public child at `index`.
    pub fn derive_child(&self, index: u32) -> XPub {
        let (tweak, chain_code) = child_tweak(&self.public_key(), &self.chain_code(), index);
        XPub::from_point(self.point + EdwardsPoint::mul_base(&tweak), chain_code)
    }

    /// Applies [`derive_child`](Self::derive_child) over every index of `path`.
    pub fn derive_path(&self, path: &DerivationPath) -> XPub {
        path.indices()
            .iter()
            .fold(*self, |key, index| key.derive_child(*index))
    }

    /// Verifies an Ed25519 signature against this key's public key.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        verify(&self.public_key(), message, signature)
    }
}

impl PartialEq for XPub {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for XPub {}

impl Hash for XPub {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl PartialOrd for XPub {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for XPub {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl TryFrom<String> for XPub {
    type Error = KeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<XPub> for String {
    fn from(xpub: XPub) -> Self {
        xpub.to_hex()
    }
}

impl fmt::Display for XPub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for XPub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XPub({})", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// XPrv
// ---------------------------------------------------------------------------

/// An extended private key: secret scalar, chain code, and the nonce prefix
/// used for deterministic signing.
///
/// Deliberately has no `Serialize` impl and a redacted `Debug`. It lives
/// inside a key store and nowhere else.
#[derive(Clone)]
pub struct XPrv {
    scalar: Scalar,
    chain_code: [u8; 32],
    prefix: [u8; 32],
}

impl XPrv {
    /// Derives a root key from seed material.
    ///
    /// `HMAC-SHA512(key = "Root", seed)`; the first half is clamped into
    /// the secret scalar, the second half becomes the chain code.
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut mac =
            HmacSha512::new_from_slice(b"Root").expect("HMAC accepts keys of any length");
        mac.update(seed);
        let out = mac.finalize().into_bytes();

        let mut secret = [0u8; 32];
        secret.copy_from_slice(&out[..32]);
        secret[0] &= 248;
        secret[31] &= 127;
        secret[31] |= 64;

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&out[32..]);

        let scalar = Scalar::from_bytes_mod_order(secret);
        Self {
            scalar,
            chain_code,
            prefix: nonce_prefix(&scalar, &chain_code),
        }
    }

    /// Generates a fresh root key from the OS RNG.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    /// The matching extended public key.
    pub fn xpub(&self) -> XPub {
        XPub::from_point(EdwardsPoint::mul_base(&self.scalar), self.chain_code)
    }

    /// Derives the private child at `index`; its `xpub()` equals
    /// `self.xpub().derive_child(index)`.
    pub fn derive_child(&self, index: u32) -> XPrv {
        let (tweak, chain_code) =
            child_tweak(&self.xpub().public_key(), &self.chain_code, index);
        let scalar = self.scalar + tweak;
        XPrv {
            scalar,
            chain_code,
            prefix: nonce_prefix(&scalar, &chain_code),
        }
    }

    pub fn derive_path(&self, path: &DerivationPath) -> XPrv {
        path.indices()
            .iter()
            .fold(self.clone(), |key, index| key.derive_child(*index))
    }

    /// Produces an Ed25519 signature over `message` with this key's scalar.
    ///
    /// The result verifies under a stock Ed25519 verifier against
    /// `self.xpub().public_key()`.
    pub fn sign(&self, message: &[u8]) -> Result<Signature, KeyError> {
        let verifying_key = VerifyingKey::from_bytes(&self.xpub().public_key())
            .map_err(|_| KeyError::InvalidPublicKey)?;
        let esk = ExpandedSecretKey {
            scalar: self.scalar,
            hash_prefix: self.prefix,
        };
        let sig = raw_sign::<Sha512>(&esk, message, &verifying_key);
        Ok(Signature(sig.to_bytes()))
    }
}

impl fmt::Debug for XPrv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XPrv(pub={})", self.xpub().to_hex())
    }
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Derives the public child of `xpub` at `index`.
pub fn derive_child(xpub: &XPub, index: u32) -> XPub {
    xpub.derive_child(index)
}

/// Repeated [`derive_child`] over the indices of `path`, in order.
pub fn derive_path(xpub: &XPub, path: &DerivationPath) -> XPub {
    xpub.derive_path(path)
}

/// Applies the same path to every key of an ordered set.
///
/// Order and cardinality are preserved, so the i-th derived key always
/// belongs to the i-th cosigner.
pub fn derive_set(xpubs: &[XPub], path: &DerivationPath) -> Vec<XPub> {
    xpubs.iter().map(|xpub| xpub.derive_path(path)).collect()
}

/// Verifies an Ed25519 signature from raw byte components.
///
/// Any malformed input (wrong lengths, invalid point) simply fails.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(pk) = <[u8; PUBLIC_KEY_LENGTH]>::try_from(public_key) else {
        return false;
    };
    let Ok(sig) = <[u8; SIGNATURE_LENGTH]>::try_from(signature) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pk) else {
        return false;
    };
    verifying_key
        .verify(message, &DalekSignature::from_bytes(&sig))
        .is_ok()
}

fn child_tweak(public_key: &[u8; 32], chain_code: &[u8; 32], index: u32) -> (Scalar, [u8; 32]) {
    let mut mac =
        HmacSha512::new_from_slice(chain_code).expect("HMAC accepts keys of any length");
    mac.update(b"N");
    mac.update(public_key);
    mac.update(&index.to_le_bytes());
    let out = mac.finalize().into_bytes();

    let mut tweak = [0u8; 32];
    tweak.copy_from_slice(&out[..32]);
    prune_intermediate_scalar(&mut tweak);

    let mut child_chain_code = [0u8; 32];
    child_chain_code.copy_from_slice(&out[32..]);

    (Scalar::from_bytes_mod_order(tweak), child_chain_code)
}

// Keeps the tweak small so repeated additions stay well below the group order.
fn prune_intermediate_scalar(f: &mut [u8; 32]) {
    f[0] &= 248;
    f[29] &= 1;
    f[30] = 0;
    f[31] = 0;
}

fn nonce_prefix(scalar: &Scalar, chain_code: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha512::new();
    hasher.update(b"Expand");
    hasher.update(scalar.as_bytes());
    hasher.update(chain_code);
    let out = hasher.finalize();
    let mut prefix = [0u8; 32];
    prefix.copy_from_slice(&out[32..]);
    prefix
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
