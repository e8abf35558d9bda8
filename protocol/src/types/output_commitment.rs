//! Output commitment codec.
//!
//! The commitment is the economic and control data of an output: which
//! asset, how much of it, and the program that must be satisfied to spend
//! it. Its canonical encoding is the only input to its content hash, so the
//! layout below is a protocol constant:
//!
//! ```text
//! varint63(len) || payload || suffix
//!
//! payload (asset version 1):
//!     asset_id[32] || varint63(amount) || varint63(vm_version)
//!     || varstr31(control_program)
//!
//! payload (any other asset version): empty
//! ```
//!
//! The suffix is opaque extension data. It is written verbatim after the
//! known fields and is included in the hash, so a node that does not yet
//! understand a future field still computes the same digest as one that
//! does. For an unknown asset version the whole blob is suffix.

use serde::{Deserialize, Serialize};

use super::hash::{AssetAmount, AssetId, Hash};
use crate::config::{ASSET_VERSION, VM_VERSION};
use crate::crypto::hash::sha3_256;
use crate::encoding::{
    write_extensible_string, write_varint63, write_varstr31, CodecContext, CodecError, Reader,
};

/// Asset, amount, VM version and control program of an output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputCommitment {
    pub asset_amount: AssetAmount,
    pub vm_version: u64,
    #[serde(with = "hex")]
    pub control_program: Vec<u8>,
}

impl OutputCommitment {
    pub fn new(asset_id: AssetId, amount: u64, control_program: Vec<u8>) -> Self {
        Self {
            asset_amount: AssetAmount::new(asset_id, amount),
            vm_version: VM_VERSION,
            control_program,
        }
    }

    pub fn asset_id(&self) -> AssetId {
        self.asset_amount.asset_id
    }

    pub fn amount(&self) -> u64 {
        self.asset_amount.amount
    }

    fn write_contents(
        &self,
        buf: &mut Vec<u8>,
        suffix: &[u8],
        asset_version: u64,
    ) -> Result<(), CodecError> {
        if asset_version == ASSET_VERSION {
            self.asset_amount.write_to(buf).field("asset amount")?;
            write_varint63(buf, self.vm_version).field("vm version")?;
            write_varstr31(buf, &self.control_program).field("control program")?;
        }
        buf.extend_from_slice(suffix);
        Ok(())
    }

    /// Appends the framed commitment to `buf`. Nothing is appended on error.
    pub fn write_extensible_string(
        &self,
        buf: &mut Vec<u8>,
        suffix: &[u8],
        asset_version: u64,
    ) -> Result<(), CodecError> {
        write_extensible_string(buf, |w| self.write_contents(w, suffix, asset_version))?;
        Ok(())
    }

    /// The canonical encoding of `(self, suffix)` under `asset_version`.
    pub fn encode(&self, suffix: &[u8], asset_version: u64) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        self.write_extensible_string(&mut buf, suffix, asset_version)?;
        Ok(buf)
    }

    /// Reads a framed commitment from `r`, returning it with its suffix.
    ///
    /// For asset version 1 the VM version must be 1. For any other asset
    /// version the fields stay at their defaults and the entire blob is
    /// returned as the suffix.
    pub fn read_from(
        r: &mut Reader<'_>,
        asset_version: u64,
    ) -> Result<(Self, Vec<u8>), CodecError> {
        let mut commitment = OutputCommitment::default();
        let suffix = r.read_extensible_string(|inner| {
            if asset_version == ASSET_VERSION {
                commitment.asset_amount =
                    AssetAmount::read_from(inner).field("asset amount")?;
                commitment.vm_version = inner.read_varint63().field("vm version")?;
                if commitment.vm_version != VM_VERSION {
                    return Err(CodecError::UnsupportedVmVersion {
                        vm_version: commitment.vm_version,
                        asset_version,
                    });
                }
                commitment.control_program =
                    inner.read_varstr31().field("control program")?.to_vec();
            }
            Ok(())
        })?;
        Ok((commitment, suffix))
    }

    /// Decodes a complete encoding; trailing bytes after the frame fail.
    pub fn decode(bytes: &[u8], asset_version: u64) -> Result<(Self, Vec<u8>), CodecError> {
        let mut r = Reader::new(bytes);
        let decoded = Self::read_from(&mut r, asset_version)?;
        r.finish()?;
        Ok(decoded)
    }

    /// SHA3-256 of the canonical encoding.
    ///
    /// This is the commitment hash folded into an output id, so the suffix
    /// weighs as much as the amount or the program: two outputs that differ
    /// only in their suffix have different ids, and a spend must present
    /// the same suffix to reference either. Under an asset version this
    /// crate does not know, only `suffix` is framed and hashed, which keeps
    /// ids of newer outputs computable by older decoders.
    ///
    /// # Example
    ///
    /// ```
    /// use tessera_protocol::config::BASE_ASSET_ID;
    /// use tessera_protocol::crypto::sha3_256;
    /// use tessera_protocol::types::OutputCommitment;
    ///
    /// let commitment = OutputCommitment::new(BASE_ASSET_ID, 1_000, vec![0x51]);
    /// let plain = commitment.hash(&[], 1).unwrap();
    /// assert_eq!(plain.0, sha3_256(&commitment.encode(&[], 1).unwrap()));
    /// assert_ne!(plain, commitment.hash(&[0x01], 1).unwrap());
    ///
    /// // An unknown version hashes the framed suffix alone.
    /// let opaque = commitment.hash(&[0xaa, 0xbb], 2).unwrap();
    /// assert_eq!(opaque.0, sha3_256(&[0x02, 0xaa, 0xbb]));
    /// ```
    pub fn hash(&self, suffix: &[u8], asset_version: u64) -> Result<Hash, CodecError> {
        let encoded = self.encode(suffix, asset_version)?;
        Ok(Hash(sha3_256(&encoded)))
    }
}

// ---------------------------------------------------------------------------
// CommitmentFrame
// ---------------------------------------------------------------------------

/// A commitment as a tagged value: its asset version, the fields that
/// version defines (eagerly decoded only when the version is understood),
/// and the raw suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentFrame {
    pub asset_version: u64,
    pub fields: Option<OutputCommitment>,
    #[serde(with = "hex")]
    pub suffix: Vec<u8>,
}

impl CommitmentFrame {
    /// A version-1 frame with no extension data.
    pub fn v1(commitment: OutputCommitment) -> Self {
        Self {
            asset_version: ASSET_VERSION,
            fields: Some(commitment),
            suffix: Vec::new(),
        }
    }

    pub fn decode(bytes: &[u8], asset_version: u64) -> Result<Self, CodecError> {
        let (commitment, suffix) = OutputCommitment::decode(bytes, asset_version)?;
        let fields = (asset_version == ASSET_VERSION).then_some(commitment);
        Ok(Self {
            asset_version,
            fields,
            suffix,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        self.commitment().encode(&self.suffix, self.asset_version)
    }

    pub fn hash(&self) -> Result<Hash, CodecError> {
        self.commitment().hash(&self.suffix, self.asset_version)
    }

    /// The known fields, or the default commitment for an opaque version.
    pub fn commitment(&self) -> OutputCommitment {
        self.fields.clone().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
