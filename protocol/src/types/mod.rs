//! Core ledger data types: identifiers, output commitments and
//! transactions with their canonical encodings.

pub mod hash;
pub mod output_commitment;
pub mod transaction;

pub use hash::{AssetAmount, AssetId, Hash};
pub use output_commitment::{CommitmentFrame, OutputCommitment};
pub use transaction::{
    compute_output_id, compute_sig_hash, MappedTx, TxData, TxInput, TxOutput,
};
