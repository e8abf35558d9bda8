//! Transaction data, its canonical encoding, and the ids derived from it.
//!
//! ## Canonical Byte Format
//!
//! ```text
//! varint63 version
//! varint63 time_range        (0 = no expiry height)
//! varint63 lock_time         (0 = no lower bound on chain time)
//! varint63 timestamp         (unix milliseconds)
//! varstr31 reference_data
//! varint63 #inputs
//!   varint63 asset_version
//!   source_id[32]
//!   varint63 source_position
//!   extensible(spent commitment, spent suffix)
//!   [witness] varint63 #arguments, varstr31 each
//! varint63 #outputs
//!   varint63 asset_version
//!   extensible(commitment, suffix)
//! ```
//!
//! The transaction id hashes the encoding *without* witness arguments, so
//! filling signatures never changes the id and every cosigner signs the same
//! signature hash no matter which slots are already filled.

use serde::{Deserialize, Serialize};

use super::hash::{AssetId, Hash};
use super::output_commitment::OutputCommitment;
use crate::config::{OUTPUT_ID_TAG, SIGHASH_CONTEXT, TXID_TAG, TX_VERSION};
use crate::crypto::hash::{domain_separated_hash_multi, tagged_sha3};
use crate::encoding::{write_varint63, write_varstr31, CodecContext, CodecError, Reader};

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Spends a previous output.
///
/// Carries the spent output's full commitment so the spent output id, the
/// amount and the control program can be recomputed without a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub asset_version: u64,
    /// Id of the transaction that created the spent output.
    pub source_id: Hash,
    /// Position of the spent output within its source transaction.
    pub source_position: u64,
    /// Commitment of the spent output.
    pub commitment: OutputCommitment,
    /// Suffix of the spent commitment, exactly as the creating output
    /// carried it. For an unknown asset version this is the whole blob.
    #[serde(with = "hex", default)]
    pub suffix: Vec<u8>,
    /// Witness arguments fed to the control program, empty until signed.
    pub arguments: Vec<Vec<u8>>,
}

impl TxInput {
    pub fn new(source_id: Hash, source_position: u64, commitment: OutputCommitment) -> Self {
        Self {
            asset_version: crate::config::ASSET_VERSION,
            source_id,
            source_position,
            commitment,
            suffix: Vec::new(),
            arguments: Vec::new(),
        }
    }

    /// The input spending output `source_position` of transaction
    /// `source_id`, copying its asset version, commitment and suffix.
    pub fn spending(source_id: Hash, source_position: u64, output: &TxOutput) -> Self {
        Self {
            asset_version: output.asset_version,
            source_id,
            source_position,
            commitment: output.commitment.clone(),
            suffix: output.suffix.clone(),
            arguments: Vec::new(),
        }
    }

    pub fn with_suffix(mut self, suffix: Vec<u8>) -> Self {
        self.suffix = suffix;
        self
    }

    pub fn asset_id(&self) -> AssetId {
        self.commitment.asset_id()
    }

    pub fn amount(&self) -> u64 {
        self.commitment.amount()
    }

    pub fn control_program(&self) -> &[u8] {
        &self.commitment.control_program
    }

    /// Id of the output this input spends.
    pub fn spent_output_id(&self) -> Result<Hash, CodecError> {
        let commitment_hash = self.commitment.hash(&self.suffix, self.asset_version)?;
        Ok(compute_output_id(
            &self.source_id,
            self.source_position,
            &commitment_hash,
        ))
    }

    fn write_to(&self, buf: &mut Vec<u8>, with_witness: bool) -> Result<(), CodecError> {
        write_varint63(buf, self.asset_version).field("asset version")?;
        buf.extend_from_slice(&self.source_id.0);
        write_varint63(buf, self.source_position).field("source position")?;
        self.commitment
            .write_extensible_string(buf, &self.suffix, self.asset_version)
            .field("spent commitment")?;
        if with_witness {
            write_varint63(buf, self.arguments.len() as u64).field("argument count")?;
            for arg in &self.arguments {
                write_varstr31(buf, arg).field("witness argument")?;
            }
        }
        Ok(())
    }

    fn read_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let asset_version = r.read_varint63().field("asset version")?;
        let source_id = Hash(r.read_array32().field("source id")?);
        let source_position = r.read_varint63().field("source position")?;
        let (commitment, suffix) =
            OutputCommitment::read_from(r, asset_version).field("spent commitment")?;
        let count = r.read_varint63().field("argument count")?;
        let mut arguments = Vec::new();
        for _ in 0..count {
            arguments.push(r.read_varstr31().field("witness argument")?.to_vec());
        }
        Ok(Self {
            asset_version,
            source_id,
            source_position,
            commitment,
            suffix,
            arguments,
        })
    }
}

/// Creates a new output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub asset_version: u64,
    pub commitment: OutputCommitment,
    /// Opaque commitment extension data, hashed verbatim.
    #[serde(with = "hex", default)]
    pub suffix: Vec<u8>,
}

impl TxOutput {
    pub fn new(asset_id: AssetId, amount: u64, control_program: Vec<u8>) -> Self {
        Self {
            asset_version: crate::config::ASSET_VERSION,
            commitment: OutputCommitment::new(asset_id, amount, control_program),
            suffix: Vec::new(),
        }
    }

    pub fn asset_id(&self) -> AssetId {
        self.commitment.asset_id()
    }

    pub fn amount(&self) -> u64 {
        self.commitment.amount()
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        write_varint63(buf, self.asset_version).field("asset version")?;
        self.commitment
            .write_extensible_string(buf, &self.suffix, self.asset_version)
            .field("output commitment")
    }

    fn read_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let asset_version = r.read_varint63().field("asset version")?;
        let (commitment, suffix) =
            OutputCommitment::read_from(r, asset_version).field("output commitment")?;
        Ok(Self {
            asset_version,
            commitment,
            suffix,
        })
    }
}

// ---------------------------------------------------------------------------
// TxData
// ---------------------------------------------------------------------------

/// The transaction proper: global metadata plus inputs and outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxData {
    pub version: u64,
    /// Last block height at which the transaction may be included.
    /// `0` means no expiry.
    pub time_range: u64,
    /// Earliest chain time (unix milliseconds) at which the transaction
    /// may be included. `0` means no lower bound.
    pub lock_time: u64,
    /// Creation time in unix milliseconds.
    pub timestamp: u64,
    #[serde(with = "hex", default)]
    pub reference_data: Vec<u8>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Default for TxData {
    fn default() -> Self {
        Self {
            version: TX_VERSION,
            time_range: 0,
            lock_time: 0,
            timestamp: 0,
            reference_data: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

impl TxData {
    /// Canonical encoding, with or without witness arguments.
    pub fn encode(&self, with_witness: bool) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(256);
        write_varint63(&mut buf, self.version).field("version")?;
        write_varint63(&mut buf, self.time_range).field("time range")?;
        write_varint63(&mut buf, self.lock_time).field("lock time")?;
        write_varint63(&mut buf, self.timestamp).field("timestamp")?;
        write_varstr31(&mut buf, &self.reference_data).field("reference data")?;

        write_varint63(&mut buf, self.inputs.len() as u64).field("input count")?;
        for input in &self.inputs {
            input.write_to(&mut buf, with_witness).field("input")?;
        }

        write_varint63(&mut buf, self.outputs.len() as u64).field("output count")?;
        for output in &self.outputs {
            output.write_to(&mut buf).field("output")?;
        }
        Ok(buf)
    }

    /// Wire bytes: the canonical encoding including witnesses.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        self.encode(true)
    }

    /// Parses wire bytes produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let version = r.read_varint63().field("version")?;
        let time_range = r.read_varint63().field("time range")?;
        let lock_time = r.read_varint63().field("lock time")?;
        let timestamp = r.read_varint63().field("timestamp")?;
        let reference_data = r.read_varstr31().field("reference data")?.to_vec();

        let input_count = r.read_varint63().field("input count")?;
        let mut inputs = Vec::new();
        for _ in 0..input_count {
            inputs.push(TxInput::read_from(&mut r).field("input")?);
        }

        let output_count = r.read_varint63().field("output count")?;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            outputs.push(TxOutput::read_from(&mut r).field("output")?);
        }
        r.finish()?;

        Ok(Self {
            version,
            time_range,
            lock_time,
            timestamp,
            reference_data,
            inputs,
            outputs,
        })
    }

    /// The transaction id. Independent of witness arguments.
    pub fn id(&self) -> Result<Hash, CodecError> {
        let encoded = self.encode(false)?;
        Ok(Hash(tagged_sha3(TXID_TAG, &[&encoded])))
    }

    /// Computes every id the validator and the signers need, in one pass.
    pub fn map(&self) -> Result<MappedTx, CodecError> {
        let id = self.id()?;
        let serialized_size = self.encode(true)?.len() as u64;

        let spent_output_ids = self
            .inputs
            .iter()
            .map(TxInput::spent_output_id)
            .collect::<Result<Vec<_>, _>>()?;

        let sig_hashes = spent_output_ids
            .iter()
            .enumerate()
            .map(|(index, spent)| compute_sig_hash(&id, index, spent))
            .collect();

        let output_ids = self
            .outputs
            .iter()
            .enumerate()
            .map(|(position, output)| {
                let commitment_hash = output
                    .commitment
                    .hash(&output.suffix, output.asset_version)?;
                Ok(compute_output_id(&id, position as u64, &commitment_hash))
            })
            .collect::<Result<Vec<_>, CodecError>>()?;

        Ok(MappedTx {
            tx: self.clone(),
            id,
            spent_output_ids,
            output_ids,
            sig_hashes,
            serialized_size,
        })
    }
}

/// A transaction together with every id derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedTx {
    pub tx: TxData,
    pub id: Hash,
    /// Output id spent by each input, by input index.
    pub spent_output_ids: Vec<Hash>,
    /// Id of each created output, by position.
    pub output_ids: Vec<Hash>,
    /// Signature hash of each input, by input index.
    pub sig_hashes: Vec<Hash>,
    /// Length of the witness encoding in bytes.
    pub serialized_size: u64,
}

/// `SHA3("tessera:output" || source_id || le64(position) || commitment_hash)`.
pub fn compute_output_id(source_id: &Hash, position: u64, commitment_hash: &Hash) -> Hash {
    Hash(tagged_sha3(
        OUTPUT_ID_TAG,
        &[&source_id.0, &position.to_le_bytes(), &commitment_hash.0],
    ))
}

/// The message every key authorizing input `index` signs.
pub fn compute_sig_hash(tx_id: &Hash, index: usize, spent_output_id: &Hash) -> Hash {
    Hash(domain_separated_hash_multi(
        SIGHASH_CONTEXT,
        &[&tx_id.0, &(index as u64).to_le_bytes(), &spent_output_id.0],
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
