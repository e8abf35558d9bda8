//! # Validation Engine
//!
//! Decides whether a finalized transaction may be admitted to chain state.
//! [`validate_tx`] reads a point-in-time [`UtxoView`] snapshot and returns a
//! [`Verdict`]; it never mutates anything, so any number of validations may
//! run concurrently against the same snapshot. Marking inputs spent is the
//! caller's job.
//!
//! ## Check order
//!
//! Cheap structural checks run first and the size limit is enforced before
//! any control program executes:
//!
//! 1. context parameters (a bad context is an `Err`, not a rejection)
//! 2. non-empty inputs and outputs
//! 3. serialized size
//! 4. transaction, asset and VM versions
//! 5. intra-transaction duplicate inputs
//! 6. time range (expiry height) and lock time
//! 7. UTXO existence, spent state and maturity
//! 8. per-asset conservation and the base-asset fee
//! 9. control programs
//!
//! Rule violations come back as [`Verdict::Reject`] carrying a
//! [`RejectKind`], so callers can choose a [`RejectPolicy`].

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ConsensusParams;
use crate::types::{AssetId, Hash, MappedTx};
use crate::vm::verify_program;

// ---------------------------------------------------------------------------
// Context and chain-state view
// ---------------------------------------------------------------------------

/// Block context supplied per validation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationContext {
    /// Height of the block the transaction would be included in.
    pub height: u64,
    /// Chain time in Unix milliseconds.
    pub chain_time: u64,
    pub params: ConsensusParams,
}

impl ValidationContext {
    pub fn new(height: u64, chain_time: u64, params: ConsensusParams) -> Self {
        Self {
            height,
            chain_time,
            params,
        }
    }
}

/// State of one output in the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub spent: bool,
    /// First height at which the output may be spent.
    pub valid_height: u64,
}

impl UtxoEntry {
    pub fn unspent(valid_height: u64) -> Self {
        Self {
            spent: false,
            valid_height,
        }
    }
}

/// Read-only chain-state snapshot keyed by output id.
pub trait UtxoView: Sync {
    fn get(&self, output_id: &Hash) -> Option<UtxoEntry>;
}

/// In-memory [`UtxoView`].
#[derive(Debug, Clone, Default)]
pub struct MemoryUtxoView {
    entries: HashMap<Hash, UtxoEntry>,
}

impl MemoryUtxoView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, output_id: Hash, entry: UtxoEntry) {
        self.entries.insert(output_id, entry);
    }

    /// Adds every output of `tx` as unspent from `valid_height`.
    pub fn add_outputs(&mut self, tx: &MappedTx, valid_height: u64) {
        for id in &tx.output_ids {
            self.insert(*id, UtxoEntry::unspent(valid_height));
        }
    }

    /// Marks every output spent by `tx`. Returns `false` if any was absent.
    pub fn apply_spends(&mut self, tx: &MappedTx) -> bool {
        let mut all_present = true;
        for id in &tx.spent_output_ids {
            match self.entries.get_mut(id) {
                Some(entry) => entry.spent = true,
                None => all_present = false,
            }
        }
        all_present
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl UtxoView for MemoryUtxoView {
    fn get(&self, output_id: &Hash) -> Option<UtxoEntry> {
        self.entries.get(output_id).copied()
    }
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// Which rule a rejected transaction broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectKind {
    /// Structurally unusable: no inputs or outputs, a zero-amount output,
    /// amount sums that overflow, or inconsistent derived ids.
    Malformed,
    /// A control program did not authorize its input.
    BadWitness,
    /// Per-asset conservation failed or the fee is negative.
    AssetImbalance,
    SizeExceeded,
    DuplicateInput,
    UnsupportedVersion,
    /// Expired, not yet valid, or spending an immature output.
    TimeLockViolation,
    /// A spent output is unknown or already spent.
    MissingUtxo,
}

/// What a caller should do with the transaction's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectPolicy {
    /// Discard quietly.
    Drop,
    /// Discard and penalize the peer that relayed it.
    Penalize,
    /// Keep aside; it may become valid as the chain advances.
    RetryLater,
}

impl RejectKind {
    pub fn policy(&self) -> RejectPolicy {
        match self {
            RejectKind::BadWitness | RejectKind::AssetImbalance | RejectKind::DuplicateInput => {
                RejectPolicy::Penalize
            }
            RejectKind::Malformed | RejectKind::SizeExceeded | RejectKind::UnsupportedVersion => {
                RejectPolicy::Drop
            }
            RejectKind::TimeLockViolation | RejectKind::MissingUtxo => RejectPolicy::RetryLater,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub kind: RejectKind,
    /// The offending input, where one is to blame.
    pub input: Option<usize>,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    pub tx_id: Hash,
    /// Base-asset inputs minus base-asset outputs.
    pub fee: u64,
    /// Serialized size in bytes.
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Accept(Accepted),
    Reject(Rejection),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Verdict::Reject(r) => Some(r),
            Verdict::Accept(_) => None,
        }
    }
}

/// Fatal conditions. Rule violations are [`Verdict::Reject`] instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid validation context: {0}")]
    InvalidContext(String),

    /// A batch's total fees do not fit in a `u64`.
    #[error("total fees overflow")]
    FeeOverflow,
}

fn reject(kind: RejectKind, input: Option<usize>, detail: impl Into<String>) -> Verdict {
    Verdict::Reject(Rejection {
        kind,
        input,
        detail: detail.into(),
    })
}

// ---------------------------------------------------------------------------
// validate_tx
// ---------------------------------------------------------------------------

/// Validates one mapped transaction against `view` at `ctx`.
///
/// Checks run cheapest first: structure and size, versions, duplicate
/// inputs, time bounds, then the UTXO lookups, the per-asset balance and
/// finally every control program against its witness. The first failure
/// decides the [`Rejection`], and its [`RejectKind`] tells the caller
/// whether to drop, retry or penalize. Only a broken context is an `Err`.
/// `view` is read, never changed.
///
/// # Example
///
/// ```
/// use tessera_protocol::account::{utxo_to_input, KeySpace, Signer, Utxo};
/// use tessera_protocol::config::{ConsensusParams, BASE_ASSET_ID};
/// use tessera_protocol::transaction::{sign, MemoryKeyStore, TxBuilder};
/// use tessera_protocol::types::{Hash, TxOutput};
/// use tessera_protocol::validation::{
///     validate_tx, MemoryUtxoView, RejectKind, UtxoEntry, ValidationContext, Verdict,
/// };
///
/// let store = MemoryKeyStore::new();
/// let xpub = store.create_key("alice", "pw").unwrap();
/// let signer = Signer::new(vec![xpub], 1, 1, KeySpace::Address).unwrap();
/// let program = signer.control_program(1).unwrap();
/// let utxo = Utxo::new(Hash([1; 32]), 0, BASE_ASSET_ID, 1_000, program, "alice".into(), 1)
///     .unwrap();
///
/// let mut view = MemoryUtxoView::new();
/// view.insert(utxo.output_id, UtxoEntry::unspent(0));
/// let ctx = ValidationContext::new(1, 1_000, ConsensusParams::default());
///
/// let (input, instruction) = utxo_to_input(&signer, &utxo).unwrap();
/// let mut template = TxBuilder::new()
///     .timestamp(1)
///     .input(input, instruction)
///     .output(TxOutput::new(BASE_ASSET_ID, 990, vec![0x51]))
///     .build()
///     .unwrap();
///
/// let unsigned = template.finalize().map().unwrap();
/// let verdict = validate_tx(&unsigned, &view, &ctx).unwrap();
/// assert_eq!(verdict.rejection().unwrap().kind, RejectKind::BadWitness);
///
/// sign(&mut template, "pw", &store).unwrap();
/// let signed = template.finalize().map().unwrap();
/// match validate_tx(&signed, &view, &ctx).unwrap() {
///     Verdict::Accept(accepted) => assert_eq!(accepted.fee, 10),
///     Verdict::Reject(r) => panic!("rejected: {:?}", r),
/// }
/// ```
pub fn validate_tx<V>(
    mapped: &MappedTx,
    view: &V,
    ctx: &ValidationContext,
) -> Result<Verdict, ValidationError>
where
    V: UtxoView + ?Sized,
{
    ctx.params
        .validate()
        .map_err(|e| ValidationError::InvalidContext(e.to_string()))?;

    let verdict = check(mapped, view, ctx);
    match &verdict {
        Verdict::Accept(a) => {
            debug!(tx_id = %a.tx_id, fee = a.fee, size = a.size, "transaction accepted");
        }
        Verdict::Reject(r) => {
            debug!(tx_id = %mapped.id, kind = ?r.kind, input = ?r.input, detail = %r.detail, "transaction rejected");
        }
    }
    Ok(verdict)
}

fn check<V>(mapped: &MappedTx, view: &V, ctx: &ValidationContext) -> Verdict
where
    V: UtxoView + ?Sized,
{
    let tx = &mapped.tx;
    let params = &ctx.params;

    if tx.inputs.is_empty() {
        return reject(RejectKind::Malformed, None, "no inputs");
    }
    if tx.outputs.is_empty() {
        return reject(RejectKind::Malformed, None, "no outputs");
    }
    if mapped.spent_output_ids.len() != tx.inputs.len()
        || mapped.sig_hashes.len() != tx.inputs.len()
        || mapped.output_ids.len() != tx.outputs.len()
    {
        return reject(RejectKind::Malformed, None, "derived ids do not match transaction");
    }

    if mapped.serialized_size > params.max_tx_size {
        return reject(
            RejectKind::SizeExceeded,
            None,
            format!("{} bytes exceeds {}", mapped.serialized_size, params.max_tx_size),
        );
    }

    if !params.supported_tx_versions.contains(&tx.version) {
        return reject(
            RejectKind::UnsupportedVersion,
            None,
            format!("transaction version {}", tx.version),
        );
    }
    for (i, input) in tx.inputs.iter().enumerate() {
        if !params.supported_asset_versions.contains(&input.asset_version) {
            return reject(
                RejectKind::UnsupportedVersion,
                Some(i),
                format!("asset version {}", input.asset_version),
            );
        }
        if !params.supported_vm_versions.contains(&input.commitment.vm_version) {
            return reject(
                RejectKind::UnsupportedVersion,
                Some(i),
                format!("vm version {}", input.commitment.vm_version),
            );
        }
    }
    for output in &tx.outputs {
        if !params.supported_asset_versions.contains(&output.asset_version)
            || !params.supported_vm_versions.contains(&output.commitment.vm_version)
        {
            return reject(RejectKind::UnsupportedVersion, None, "output version");
        }
    }

    let mut seen = HashSet::with_capacity(mapped.spent_output_ids.len());
    for (i, id) in mapped.spent_output_ids.iter().enumerate() {
        if !seen.insert(id) {
            return reject(RejectKind::DuplicateInput, Some(i), format!("output {} spent twice", id));
        }
    }

    if tx.time_range > 0 && ctx.height > tx.time_range {
        return reject(
            RejectKind::TimeLockViolation,
            None,
            format!("expired at height {}", tx.time_range),
        );
    }
    if tx.lock_time > ctx.chain_time {
        return reject(
            RejectKind::TimeLockViolation,
            None,
            format!("locked until {}", tx.lock_time),
        );
    }

    for (i, id) in mapped.spent_output_ids.iter().enumerate() {
        match view.get(id) {
            None => return reject(RejectKind::MissingUtxo, Some(i), format!("unknown output {}", id)),
            Some(entry) if entry.spent => {
                return reject(RejectKind::MissingUtxo, Some(i), format!("output {} already spent", id));
            }
            Some(entry) if entry.valid_height > ctx.height => {
                return reject(
                    RejectKind::TimeLockViolation,
                    Some(i),
                    format!("output immature until height {}", entry.valid_height),
                );
            }
            Some(_) => {}
        }
    }

    let fee = match balance(mapped, &params.base_asset_id) {
        Ok(fee) => fee,
        Err(verdict) => return verdict,
    };

    for (i, input) in tx.inputs.iter().enumerate() {
        if let Err(e) = verify_program(input.control_program(), &input.arguments, &mapped.sig_hashes[i]) {
            return reject(RejectKind::BadWitness, Some(i), e.to_string());
        }
    }

    Verdict::Accept(Accepted {
        tx_id: mapped.id,
        fee,
        size: mapped.serialized_size,
    })
}

/// Per-asset sums. Non-base assets must balance exactly; the base-asset
/// surplus is the fee.
fn balance(mapped: &MappedTx, base_asset: &AssetId) -> Result<u64, Verdict> {
    let mut sums: BTreeMap<AssetId, (u64, u64)> = BTreeMap::new();
    for input in &mapped.tx.inputs {
        let entry = sums.entry(input.asset_id()).or_default();
        entry.0 = entry
            .0
            .checked_add(input.amount())
            .ok_or_else(|| reject(RejectKind::Malformed, None, "input sum overflows"))?;
    }
    for output in &mapped.tx.outputs {
        if output.amount() == 0 {
            return Err(reject(RejectKind::Malformed, None, "zero-amount output"));
        }
        let entry = sums.entry(output.asset_id()).or_default();
        entry.1 = entry
            .1
            .checked_add(output.amount())
            .ok_or_else(|| reject(RejectKind::Malformed, None, "output sum overflows"))?;
    }

    let mut fee = 0;
    for (asset, (spent, created)) in sums {
        if asset == *base_asset {
            fee = spent.checked_sub(created).ok_or_else(|| {
                reject(
                    RejectKind::AssetImbalance,
                    None,
                    format!("base asset outputs {} exceed inputs {}", created, spent),
                )
            })?;
        } else if spent != created {
            return Err(reject(
                RejectKind::AssetImbalance,
                None,
                format!("asset {} in {} out {}", asset, spent, created),
            ));
        }
    }
    Ok(fee)
}

// ---------------------------------------------------------------------------
// Batch validation
// ---------------------------------------------------------------------------

/// Verdicts for a candidate block's transactions, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub verdicts: Vec<Verdict>,
    pub total_fees: u64,
}

/// `view` plus the effects of transactions accepted earlier in the batch.
struct OverlayView<'a, V: ?Sized> {
    base: &'a V,
    spent: HashSet<Hash>,
    created: HashMap<Hash, UtxoEntry>,
}

impl<V: UtxoView + ?Sized> UtxoView for OverlayView<'_, V> {
    fn get(&self, output_id: &Hash) -> Option<UtxoEntry> {
        if self.spent.contains(output_id) {
            return None;
        }
        self.created
            .get(output_id)
            .copied()
            .or_else(|| self.base.get(output_id))
    }
}

/// Validates `txs` in order as the contents of one block.
///
/// Outputs created by an accepted transaction are spendable by later ones;
/// an output spent by an accepted transaction is gone for later ones, so a
/// cross-transaction double spend is rejected as `MissingUtxo`. `view` is
/// never mutated.
pub fn validate_batch<V>(
    txs: &[MappedTx],
    view: &V,
    ctx: &ValidationContext,
) -> Result<BatchOutcome, ValidationError>
where
    V: UtxoView + ?Sized,
{
    let mut overlay = OverlayView {
        base: view,
        spent: HashSet::new(),
        created: HashMap::new(),
    };
    let mut verdicts = Vec::with_capacity(txs.len());
    let mut total_fees: u64 = 0;

    for mapped in txs {
        let verdict = validate_tx(mapped, &overlay, ctx)?;
        if let Verdict::Accept(accepted) = &verdict {
            total_fees = total_fees
                .checked_add(accepted.fee)
                .ok_or(ValidationError::FeeOverflow)?;
            overlay.spent.extend(mapped.spent_output_ids.iter().copied());
            for id in &mapped.output_ids {
                overlay.created.insert(*id, UtxoEntry::unspent(ctx.height));
            }
        }
        verdicts.push(verdict);
    }

    debug!(count = txs.len(), total_fees, "batch validated");
    Ok(BatchOutcome {
        verdicts,
        total_fees,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BASE_ASSET_ID;
    use crate::crypto::keys::{DerivationPath, XPrv};
    use crate::transaction::{sign, RequiredKey, SigningInstruction, TxBuilder};
    use crate::types::{OutputCommitment, TxData, TxInput, TxOutput};

    const GOLD: AssetId = AssetId([0x47; 32]);

    struct Fixture {
        key: XPrv,
        instruction: SigningInstruction,
        view: MemoryUtxoView,
    }

    impl Fixture {
        fn new() -> Self {
            let key = XPrv::from_seed(b"validator tests");
            let required = RequiredKey::new(key.xpub(), DerivationPath::new(vec![1, 1, 1]));
            let instruction = SigningInstruction::new(vec![required], 1).unwrap();
            Self {
                key,
                instruction,
                view: MemoryUtxoView::new(),
            }
        }

        /// An input spending a fresh output that is registered in the view.
        fn utxo(&mut self, asset: AssetId, amount: u64, position: u64) -> TxInput {
            let program = self.instruction.control_program().unwrap();
            let input = TxInput::new(
                Hash([0xee; 32]),
                position,
                OutputCommitment::new(asset, amount, program),
            );
            self.view
                .insert(input.spent_output_id().unwrap(), UtxoEntry::unspent(0));
            input
        }

        fn signed(&self, builder: TxBuilder) -> MappedTx {
            let mut tpl = builder.build().unwrap();
            let key = self.key.clone();
            let store = move |_: &crate::crypto::keys::XPub,
                              path: &DerivationPath,
                              data: &[u8],
                              _: &str|
                  -> Result<crate::crypto::keys::Signature, crate::transaction::KeyStoreError> {
                Ok(key.derive_path(path).sign(data).unwrap())
            };
            sign(&mut tpl, "", &store).unwrap();
            tpl.finalize().map().unwrap()
        }

        fn spend(&mut self, amount_in: u64, amount_out: u64) -> MappedTx {
            let input = self.utxo(BASE_ASSET_ID, amount_in, 0);
            let builder = TxBuilder::new()
                .timestamp(1)
                .input(input, self.instruction.clone())
                .output(TxOutput::new(BASE_ASSET_ID, amount_out, vec![0x51]));
            self.signed(builder)
        }
    }

    fn ctx() -> ValidationContext {
        ValidationContext::new(10, 1_000, ConsensusParams::default())
    }

    fn kind(v: &Verdict) -> RejectKind {
        v.rejection().expect("expected a rejection").kind
    }

    #[test]
    fn accepts_and_reports_fee() {
        let mut f = Fixture::new();
        let tx = f.spend(100, 90);
        let verdict = validate_tx(&tx, &f.view, &ctx()).unwrap();
        assert_eq!(
            verdict,
            Verdict::Accept(Accepted {
                tx_id: tx.id,
                fee: 10,
                size: tx.serialized_size
            })
        );
    }

    #[test]
    fn base_asset_deficit_is_imbalance() {
        let mut f = Fixture::new();
        let mut tx = f.spend(100, 90);
        tx.tx.outputs[0].commitment.asset_amount.amount = 101;
        assert_eq!(kind(&validate_tx(&tx, &f.view, &ctx()).unwrap()), RejectKind::AssetImbalance);
    }

    #[test]
    fn non_base_asset_must_balance_exactly() {
        let mut f = Fixture::new();
        let gold = f.utxo(GOLD, 50, 1);
        let fee = f.utxo(BASE_ASSET_ID, 10, 2);
        let builder = |gold_out| {
            TxBuilder::new()
                .timestamp(1)
                .input(gold.clone(), f.instruction.clone())
                .input(fee.clone(), f.instruction.clone())
                .output(TxOutput::new(GOLD, gold_out, vec![0x51]))
                .output(TxOutput::new(BASE_ASSET_ID, 5, vec![0x51]))
        };
        let balanced = f.signed(builder(50));
        assert!(validate_tx(&balanced, &f.view, &ctx()).unwrap().is_accept());

        let short = f.signed(builder(49));
        assert_eq!(kind(&validate_tx(&short, &f.view, &ctx()).unwrap()), RejectKind::AssetImbalance);
    }

    #[test]
    fn missing_spent_and_immature_utxos() {
        let mut f = Fixture::new();
        let tx = f.spend(100, 90);

        let empty = MemoryUtxoView::new();
        assert_eq!(kind(&validate_tx(&tx, &empty, &ctx()).unwrap()), RejectKind::MissingUtxo);

        let mut spent = f.view.clone();
        assert!(spent.apply_spends(&tx));
        assert_eq!(kind(&validate_tx(&tx, &spent, &ctx()).unwrap()), RejectKind::MissingUtxo);

        let mut immature = MemoryUtxoView::new();
        immature.insert(tx.spent_output_ids[0], UtxoEntry::unspent(11));
        let v = validate_tx(&tx, &immature, &ctx()).unwrap();
        assert_eq!(kind(&v), RejectKind::TimeLockViolation);
        assert_eq!(v.rejection().unwrap().input, Some(0));
    }

    #[test]
    fn expiry_and_lock_time() {
        let mut f = Fixture::new();
        let input = f.utxo(BASE_ASSET_ID, 10, 0);
        let base = || {
            TxBuilder::new()
                .timestamp(1)
                .input(input.clone(), f.instruction.clone())
                .output(TxOutput::new(BASE_ASSET_ID, 10, vec![0x51]))
        };
        let expired = f.signed(base().time_range(9));
        assert_eq!(kind(&validate_tx(&expired, &f.view, &ctx()).unwrap()), RejectKind::TimeLockViolation);

        let locked = f.signed(base().lock_time(1_001));
        assert_eq!(kind(&validate_tx(&locked, &f.view, &ctx()).unwrap()), RejectKind::TimeLockViolation);

        let in_window = f.signed(base().time_range(10).lock_time(1_000));
        assert!(validate_tx(&in_window, &f.view, &ctx()).unwrap().is_accept());
    }

    #[test]
    fn duplicate_input_is_rejected() {
        let mut f = Fixture::new();
        let input = f.utxo(BASE_ASSET_ID, 10, 0);
        let tx = f.signed(
            TxBuilder::new()
                .timestamp(1)
                .input(input.clone(), f.instruction.clone())
                .input(input, f.instruction.clone())
                .output(TxOutput::new(BASE_ASSET_ID, 10, vec![0x51])),
        );
        let v = validate_tx(&tx, &f.view, &ctx()).unwrap();
        assert_eq!(kind(&v), RejectKind::DuplicateInput);
        assert_eq!(v.rejection().unwrap().input, Some(1));
        assert_eq!(RejectKind::DuplicateInput.policy(), RejectPolicy::Penalize);
    }

    #[test]
    fn size_is_checked_before_programs() {
        let mut f = Fixture::new();
        let mut tx = f.spend(100, 90);
        // Garbage witness would fail the program, but size fails first.
        tx.tx.inputs[0].arguments = vec![vec![0u8; 64]];
        let params = ConsensusParams {
            max_tx_size: tx.serialized_size - 1,
            ..ConsensusParams::default()
        };
        let small = ValidationContext::new(10, 1_000, params);
        assert_eq!(kind(&validate_tx(&tx, &f.view, &small).unwrap()), RejectKind::SizeExceeded);
    }

    #[test]
    fn tampered_witness_is_bad_witness() {
        let mut f = Fixture::new();
        let mut tx = f.spend(100, 90);
        tx.tx.inputs[0].arguments[0][5] ^= 0xff;
        let v = validate_tx(&tx, &f.view, &ctx()).unwrap();
        assert_eq!(kind(&v), RejectKind::BadWitness);
        assert_eq!(RejectKind::BadWitness.policy(), RejectPolicy::Penalize);

        let mut unsigned = f.spend(100, 90);
        unsigned.tx.inputs[0].arguments.clear();
        assert_eq!(kind(&validate_tx(&unsigned, &f.view, &ctx()).unwrap()), RejectKind::BadWitness);
    }

    #[test]
    fn unsupported_versions() {
        let mut f = Fixture::new();
        let mut tx = f.spend(100, 90);
        tx.tx.version = 2;
        assert_eq!(kind(&validate_tx(&tx, &f.view, &ctx()).unwrap()), RejectKind::UnsupportedVersion);

        let mut tx = f.spend(100, 90);
        tx.tx.outputs[0].commitment.vm_version = 3;
        assert_eq!(kind(&validate_tx(&tx, &f.view, &ctx()).unwrap()), RejectKind::UnsupportedVersion);
    }

    #[test]
    fn zero_amount_output_is_malformed() {
        let mut f = Fixture::new();
        let mut tx = f.spend(100, 90);
        tx.tx.outputs[0].commitment.asset_amount.amount = 0;
        let v = validate_tx(&tx, &f.view, &ctx()).unwrap();
        assert_eq!(kind(&v), RejectKind::Malformed);
        assert_eq!(RejectKind::Malformed.policy(), RejectPolicy::Drop);
    }

    #[test]
    fn malformed_context_is_an_error() {
        let mut f = Fixture::new();
        let tx = f.spend(100, 90);
        let params = ConsensusParams {
            supported_vm_versions: vec![],
            ..ConsensusParams::default()
        };
        let bad = ValidationContext::new(10, 1_000, params);
        assert!(matches!(
            validate_tx(&tx, &f.view, &bad),
            Err(ValidationError::InvalidContext(_))
        ));
    }

    #[test]
    fn batch_rejects_cross_transaction_double_spend() {
        let mut f = Fixture::new();
        let first = f.spend(100, 90);
        // Same input, different output: a conflicting spend.
        let input = first.tx.inputs[0].clone();
        let mut unsigned_input = input.clone();
        unsigned_input.arguments.clear();
        let second = f.signed(
            TxBuilder::new()
                .timestamp(2)
                .input(unsigned_input, f.instruction.clone())
                .output(TxOutput::new(BASE_ASSET_ID, 80, vec![0x51])),
        );

        let outcome = validate_batch(&[first.clone(), second], &f.view, &ctx()).unwrap();
        assert!(outcome.verdicts[0].is_accept());
        assert_eq!(kind(&outcome.verdicts[1]), RejectKind::MissingUtxo);
        assert_eq!(outcome.total_fees, 10);

        // The snapshot itself is untouched.
        assert_eq!(f.view.get(&first.spent_output_ids[0]), Some(UtxoEntry::unspent(0)));
    }

    #[test]
    fn batch_allows_spending_earlier_outputs() {
        let mut f = Fixture::new();
        let program = f.instruction.control_program().unwrap();
        let input = f.utxo(BASE_ASSET_ID, 100, 0);
        let parent = f.signed(
            TxBuilder::new()
                .timestamp(1)
                .input(input, f.instruction.clone())
                .output(TxOutput::new(BASE_ASSET_ID, 95, program.clone())),
        );
        let child_input = TxInput::new(parent.id, 0, parent.tx.outputs[0].commitment.clone());
        let child = f.signed(
            TxBuilder::new()
                .timestamp(2)
                .input(child_input, f.instruction.clone())
                .output(TxOutput::new(BASE_ASSET_ID, 93, vec![0x51])),
        );

        let outcome = validate_batch(&[parent, child], &f.view, &ctx()).unwrap();
        assert!(outcome.verdicts.iter().all(Verdict::is_accept));
        assert_eq!(outcome.total_fees, 7);
    }

    #[test]
    fn concurrent_validation_against_one_snapshot() {
        let mut f = Fixture::new();
        let txs: Vec<MappedTx> = (0..8).map(|_| f.spend(100, 99)).collect();
        let view = &f.view;
        let context = ctx();
        std::thread::scope(|s| {
            for tx in &txs {
                let context = &context;
                s.spawn(move || {
                    for _ in 0..4 {
                        assert!(validate_tx(tx, view, context).unwrap().is_accept());
                    }
                });
            }
        });
    }

    #[test]
    fn mapped_from_bytes_validates_like_original() {
        let mut f = Fixture::new();
        let tx = f.spend(100, 90);
        let wire = tx.tx.to_bytes().unwrap();
        let decoded = TxData::from_bytes(&wire).unwrap().map().unwrap();
        assert_eq!(decoded, tx);
        assert!(validate_tx(&decoded, &f.view, &ctx()).unwrap().is_accept());
    }
}
