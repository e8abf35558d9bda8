//! Transaction construction via the builder pattern.
//!
//! The [`TxBuilder`] collects inputs (each paired with the
//! [`SigningInstruction`] of the signer that owns the spent output) and
//! outputs, then `.build()` checks the amounts and returns a
//! [`TransactionTemplate`]: the unsigned transaction plus one instruction
//! per input, ready for [`super::signing::sign`].
//!
//! The builder does not sign. This keeps construction testable without
//! key material.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::signing::{SigningError, SigningInstruction};
use crate::encoding::CodecError;
use crate::types::{AssetId, Hash, TxData, TxInput, TxOutput};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("transaction has no inputs")]
    NoInputs,

    #[error("transaction has no outputs")]
    NoOutputs,

    /// Summing amounts of one asset overflowed.
    #[error("amount overflow for asset {0}")]
    AmountOverflow(AssetId),

    /// Outputs spend more of an asset than the inputs provide.
    #[error("outputs exceed inputs for asset {0}")]
    AmountUnderflow(AssetId),

    #[error("encoding error: {0}")]
    Codec(#[from] CodecError),
}

// ---------------------------------------------------------------------------
// TransactionTemplate
// ---------------------------------------------------------------------------

/// An unsigned transaction paired with its in-progress signing state.
///
/// The transaction itself is immutable; only signature slots change, and
/// only through [`super::signing::sign`], [`super::signing::SharedTemplate`]
/// or [`merge`](Self::merge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionTemplate {
    tx: TxData,
    signing_instructions: Vec<SigningInstruction>,
}

impl TransactionTemplate {
    pub(crate) fn from_parts(tx: TxData, signing_instructions: Vec<SigningInstruction>) -> Self {
        Self {
            tx,
            signing_instructions,
        }
    }

    pub(crate) fn into_parts(self) -> (TxData, Vec<SigningInstruction>) {
        (self.tx, self.signing_instructions)
    }

    pub(crate) fn instructions_mut(&mut self) -> &mut [SigningInstruction] {
        &mut self.signing_instructions
    }

    /// Fails unless there is exactly one instruction per input. A
    /// deserialized template may violate this.
    pub(crate) fn check_instruction_count(&self) -> Result<(), SigningError> {
        if self.signing_instructions.len() != self.tx.inputs.len() {
            return Err(SigningError::TemplateMismatch("instruction count"));
        }
        Ok(())
    }

    /// The unsigned transaction.
    pub fn tx(&self) -> &TxData {
        &self.tx
    }

    pub fn signing_instructions(&self) -> &[SigningInstruction] {
        &self.signing_instructions
    }

    pub fn id(&self) -> Result<Hash, CodecError> {
        self.tx.id()
    }

    /// Filled-slot count per input, in input order.
    pub fn signature_counts(&self) -> Vec<usize> {
        self.signing_instructions
            .iter()
            .map(SigningInstruction::filled_count)
            .collect()
    }

    /// The transaction with every input's witness built from its filled
    /// slots. Call once [`super::signing::sign_progress`] is true.
    pub fn finalize(&self) -> TxData {
        let mut tx = self.tx.clone();
        for (input, instruction) in tx.inputs.iter_mut().zip(&self.signing_instructions) {
            input.arguments = instruction.witness();
        }
        tx
    }

    /// Merges the filled slots of `other` into `self`.
    ///
    /// Both templates must describe the same transaction with the same keys.
    /// Every incoming signature is verified and every slot checked for a
    /// conflict before anything is applied, so a failed merge leaves `self`
    /// untouched. Returns the number of slots newly filled.
    pub fn merge(&mut self, other: &TransactionTemplate) -> Result<usize, SigningError> {
        if self.tx != other.tx {
            return Err(SigningError::TemplateMismatch("transaction"));
        }
        self.check_instruction_count()?;
        other.check_instruction_count()?;

        let mapped = self.tx.map()?;
        let mut additions = Vec::new();
        for (input, (ours, theirs)) in self
            .signing_instructions
            .iter()
            .zip(&other.signing_instructions)
            .enumerate()
        {
            if !ours.is_well_formed() || !theirs.is_well_formed() {
                return Err(SigningError::InvalidInstruction { input });
            }
            if !ours.same_keys(theirs) {
                return Err(SigningError::TemplateMismatch("signing keys"));
            }
            let message = mapped.sig_hashes[input];
            for (slot, (mine, incoming)) in ours.slots().iter().zip(theirs.slots()).enumerate() {
                match (mine, incoming) {
                    (Some(a), Some(b)) if a != b => {
                        return Err(SigningError::SlotConflict { input, slot });
                    }
                    (None, Some(sig)) => {
                        let key = &ours.keys()[slot].derived;
                        if !key.verify(message.as_bytes(), sig.as_bytes()) {
                            return Err(SigningError::InvalidSignature { input, slot });
                        }
                        additions.push((input, slot, *sig));
                    }
                    _ => {}
                }
            }
        }

        let added = additions.len();
        for (input, slot, sig) in additions {
            // Conflicts were ruled out above.
            let _ = self.signing_instructions[input].fill(slot, sig);
        }
        debug!(added, "merged signing templates");
        Ok(added)
    }
}

// ---------------------------------------------------------------------------
// TxBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`TransactionTemplate`]s.
///
/// `timestamp` defaults to the current UTC time at build; `time_range` and
/// `lock_time` default to zero (unbounded).
#[derive(Debug, Default)]
pub struct TxBuilder {
    inputs: Vec<(TxInput, SigningInstruction)>,
    outputs: Vec<TxOutput>,
    timestamp: Option<u64>,
    reference_data: Vec<u8>,
    time_range: u64,
    lock_time: u64,
}

impl TxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an input and the instruction telling signers how to authorize it.
    pub fn input(mut self, input: TxInput, instruction: SigningInstruction) -> Self {
        self.inputs.push((input, instruction));
        self
    }

    pub fn output(mut self, output: TxOutput) -> Self {
        self.outputs.push(output);
        self
    }

    /// Sets the timestamp explicitly (Unix milliseconds).
    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn reference_data(mut self, data: Vec<u8>) -> Self {
        self.reference_data = data;
        self
    }

    /// Last block height at which the transaction may be included.
    pub fn time_range(mut self, max_height: u64) -> Self {
        self.time_range = max_height;
        self
    }

    /// Earliest chain time (Unix milliseconds) for inclusion.
    pub fn lock_time(mut self, not_before: u64) -> Self {
        self.lock_time = not_before;
        self
    }

    /// Consumes the builder and produces the unsigned template.
    ///
    /// Fails on zero inputs, zero outputs, a per-asset sum that overflows,
    /// or outputs exceeding inputs for any asset.
    pub fn build(self) -> Result<TransactionTemplate, BuildError> {
        if self.inputs.is_empty() {
            return Err(BuildError::NoInputs);
        }
        if self.outputs.is_empty() {
            return Err(BuildError::NoOutputs);
        }

        let mut balances: BTreeMap<AssetId, (u64, u64)> = BTreeMap::new();
        for (input, _) in &self.inputs {
            let entry = balances.entry(input.asset_id()).or_default();
            entry.0 = entry
                .0
                .checked_add(input.amount())
                .ok_or(BuildError::AmountOverflow(input.asset_id()))?;
        }
        for output in &self.outputs {
            let entry = balances.entry(output.asset_id()).or_default();
            entry.1 = entry
                .1
                .checked_add(output.amount())
                .ok_or(BuildError::AmountOverflow(output.asset_id()))?;
        }
        for (asset, (spent, created)) in &balances {
            if created > spent {
                return Err(BuildError::AmountUnderflow(*asset));
            }
        }

        let timestamp = self
            .timestamp
            .unwrap_or_else(|| Utc::now().timestamp_millis() as u64);
        let (inputs, instructions): (Vec<_>, Vec<_>) = self.inputs.into_iter().unzip();
        let tx = TxData {
            timestamp,
            time_range: self.time_range,
            lock_time: self.lock_time,
            reference_data: self.reference_data,
            inputs,
            outputs: self.outputs,
            ..TxData::default()
        };

        // Surface encoding problems now rather than at signing time.
        let id = tx.id()?;
        debug!(tx_id = %id, inputs = tx.inputs.len(), outputs = tx.outputs.len(), "built transaction template");

        Ok(TransactionTemplate::from_parts(tx, instructions))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
