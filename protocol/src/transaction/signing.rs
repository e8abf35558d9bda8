//! # Threshold Signing
//!
//! Each input of a [`TransactionTemplate`] carries a [`SigningInstruction`]:
//! the ordered keys that may authorize it, the quorum `M`, and one
//! signature slot per key. Signing parties fill slots independently.
//!
//! ## Protocol
//!
//! [`sign`] walks every input and asks the [`KeyStore`] for a signature on
//! each key whose slot is still empty. The store answers one of three ways:
//!
//! 1. A signature. It is checked against the derived key and placed in the
//!    slot for that key.
//! 2. [`KeyStoreError::KeyNotControlled`]. The slot is skipped; a party
//!    holding a subset of the keys is the normal case.
//! 3. Any other error. The call stops at once. Slots filled earlier in the
//!    same call stay filled; nothing is rolled back.
//!
//! A filled slot is never cleared or replaced. Because every party signs
//! the same per-input signature hash and slots are keyed by position, any
//! order, partition or repetition of signers converges to the same
//! template.
//!
//! ## Concurrency
//!
//! [`SharedTemplate`] lets several sessions sign one template from
//! different threads. Each input has its own lock, taken only to read the
//! pending slots and to write one slot, never across the key-store call.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::builder::TransactionTemplate;
use crate::config::MAX_MULTISIG_KEYS;
use crate::crypto::hash::pubkey_hash;
use crate::crypto::keys::{DerivationPath, Signature, XPub};
use crate::encoding::CodecError;
use crate::types::{Hash, TxData};
use crate::vm::{multisig_program, p2pkh_program, VmError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures reported by a [`KeyStore`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    /// The store does not control this key in this session. Skippable.
    #[error("key not controlled by this store")]
    KeyNotControlled,

    /// The store failed. Aborts signing.
    #[error("key store failure: {0}")]
    Backend(String),

    /// Another key is already stored under this alias.
    #[error("duplicate key alias '{0}'")]
    DuplicateAlias(String),

    /// The key is already stored.
    #[error("key already stored")]
    DuplicateKey,
}

/// A slot already holds a different signature.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("slot {slot} already holds a different signature")]
pub struct SlotConflict {
    pub slot: usize,
}

/// Errors that abort a signing or merge operation.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The key store returned a hard failure.
    #[error("input {input} slot {slot}: {source}")]
    KeyStore {
        input: usize,
        slot: usize,
        #[source]
        source: KeyStoreError,
    },

    /// A signature does not verify under the slot's derived key.
    #[error("input {input} slot {slot}: signature does not verify")]
    InvalidSignature { input: usize, slot: usize },

    /// Two different signatures claim the same slot.
    #[error("input {input} slot {slot}: conflicting signatures")]
    SlotConflict { input: usize, slot: usize },

    /// The quorum is outside `1 <= M <= N <= 20`.
    #[error("invalid quorum {m}-of-{n}")]
    InvalidQuorum { m: usize, n: usize },

    /// An instruction's slot array does not match its key list.
    #[error("input {input}: malformed signing instruction")]
    InvalidInstruction { input: usize },

    /// A template's parts disagree, with each other or with the template
    /// being merged.
    #[error("templates differ: {0}")]
    TemplateMismatch(&'static str),

    #[error("input {input} out of range for {inputs} inputs")]
    NoSuchInput { input: usize, inputs: usize },

    #[error("encoding error: {0}")]
    Codec(#[from] CodecError),
}

// ---------------------------------------------------------------------------
// KeyStore
// ---------------------------------------------------------------------------

/// The signing contract of a secured key store.
///
/// `xsign` signs `data` with the private key of `root_xpub` derived along
/// `path`. The store may block (password-gated decryption).
pub trait KeyStore: Send + Sync {
    fn xsign(
        &self,
        root_xpub: &XPub,
        path: &DerivationPath,
        data: &[u8],
        password: &str,
    ) -> Result<Signature, KeyStoreError>;
}

impl<F> KeyStore for F
where
    F: Fn(&XPub, &DerivationPath, &[u8], &str) -> Result<Signature, KeyStoreError> + Send + Sync,
{
    fn xsign(
        &self,
        root_xpub: &XPub,
        path: &DerivationPath,
        data: &[u8],
        password: &str,
    ) -> Result<Signature, KeyStoreError> {
        self(root_xpub, path, data, password)
    }
}

// ---------------------------------------------------------------------------
// SigningInstruction
// ---------------------------------------------------------------------------

/// One key that may authorize an input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredKey {
    /// Root extended key, as the key store knows it.
    pub xpub: XPub,
    pub derivation_path: DerivationPath,
    /// `xpub` derived along `derivation_path`; the key in the program.
    pub derived: XPub,
}

impl RequiredKey {
    pub fn new(xpub: XPub, derivation_path: DerivationPath) -> Self {
        let derived = xpub.derive_path(&derivation_path);
        Self {
            xpub,
            derivation_path,
            derived,
        }
    }
}

/// Required keys, quorum and signature slots of one input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningInstruction {
    keys: Vec<RequiredKey>,
    quorum: usize,
    slots: Vec<Option<Signature>>,
}

impl SigningInstruction {
    /// Creates an instruction with every slot empty.
    pub fn new(keys: Vec<RequiredKey>, quorum: usize) -> Result<Self, SigningError> {
        let n = keys.len();
        if quorum == 0 || quorum > n || n > MAX_MULTISIG_KEYS {
            return Err(SigningError::InvalidQuorum { m: quorum, n });
        }
        Ok(Self {
            slots: vec![None; n],
            keys,
            quorum,
        })
    }

    pub fn keys(&self) -> &[RequiredKey] {
        &self.keys
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn slots(&self) -> &[Option<Signature>] {
        &self.slots
    }

    pub fn filled_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Cardinality only: at least `quorum` slots are filled.
    pub fn is_satisfied(&self) -> bool {
        self.filled_count() >= self.quorum
    }

    /// Slots still empty, with their keys.
    pub fn pending(&self) -> Vec<(usize, RequiredKey)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| (i, self.keys[i].clone()))
            .collect()
    }

    /// Places `signature` in `slot`.
    ///
    /// Returns `Ok(true)` if the slot was empty, `Ok(false)` if it already
    /// held the same signature. Panics if `slot` is out of range.
    pub fn fill(&mut self, slot: usize, signature: Signature) -> Result<bool, SlotConflict> {
        match self.slots[slot] {
            None => {
                self.slots[slot] = Some(signature);
                Ok(true)
            }
            Some(existing) if existing == signature => Ok(false),
            Some(_) => Err(SlotConflict { slot }),
        }
    }

    /// Structural sanity of a deserialized instruction.
    pub(crate) fn is_well_formed(&self) -> bool {
        let n = self.keys.len();
        self.slots.len() == n && self.quorum >= 1 && self.quorum <= n && n <= MAX_MULTISIG_KEYS
    }

    pub(crate) fn same_keys(&self, other: &SigningInstruction) -> bool {
        self.keys == other.keys && self.quorum == other.quorum
    }

    /// The derived public keys in slot order.
    pub fn derived_public_keys(&self) -> Vec<[u8; 32]> {
        self.keys.iter().map(|k| k.derived.public_key()).collect()
    }

    /// The control program these keys satisfy: pay-to-pubkey-hash for a
    /// single key, M-of-N multisig otherwise.
    pub fn control_program(&self) -> Result<Vec<u8>, VmError> {
        let keys = self.derived_public_keys();
        if keys.len() == 1 {
            Ok(p2pkh_program(&pubkey_hash(&keys[0])))
        } else {
            multisig_program(&keys, self.quorum)
        }
    }

    /// Witness arguments for the input built from the filled slots.
    ///
    /// Single key: `[signature, derived public key]`. Multisig: the first
    /// `quorum` filled signatures in key order.
    pub fn witness(&self) -> Vec<Vec<u8>> {
        if self.keys.len() == 1 {
            return match &self.slots[0] {
                Some(sig) => vec![sig.to_vec(), self.keys[0].derived.public_key().to_vec()],
                None => Vec::new(),
            };
        }
        self.slots
            .iter()
            .flatten()
            .take(self.quorum)
            .map(Signature::to_vec)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// sign / sign_progress
// ---------------------------------------------------------------------------

fn sign_pending<S, F>(
    input: usize,
    sig_hash: &Hash,
    pending: Vec<(usize, RequiredKey)>,
    password: &str,
    store: &S,
    mut fill: F,
) -> Result<usize, SigningError>
where
    S: KeyStore + ?Sized,
    F: FnMut(usize, Signature) -> Result<bool, SlotConflict>,
{
    let mut filled = 0;
    for (slot, key) in pending {
        match store.xsign(&key.xpub, &key.derivation_path, sig_hash.as_bytes(), password) {
            Ok(signature) => {
                if !key.derived.verify(sig_hash.as_bytes(), signature.as_bytes()) {
                    warn!(input, slot, "key store returned a signature that does not verify");
                    return Err(SigningError::InvalidSignature { input, slot });
                }
                let added = fill(slot, signature)
                    .map_err(|c| SigningError::SlotConflict { input, slot: c.slot })?;
                if added {
                    filled += 1;
                    debug!(input, slot, "signature slot filled");
                }
            }
            Err(KeyStoreError::KeyNotControlled) => {
                debug!(input, slot, "key not controlled by this store, skipping");
            }
            Err(source) => {
                warn!(input, slot, error = %source, "signing aborted");
                return Err(SigningError::KeyStore {
                    input,
                    slot,
                    source,
                });
            }
        }
    }
    Ok(filled)
}

/// Fills every empty slot the store can sign for. Returns the number of
/// slots newly filled.
///
/// Each input is signed over its own signature hash, which commits to the
/// transaction id, the input index and the spent output id. Because the id
/// ignores witnesses, cosigners can sign the same template in any order, on
/// separate machines, and merge the results later. Keys the store does not
/// hold are skipped. Every signature the store returns is verified against
/// the slot's derived key before it is stored, and a filled slot is never
/// overwritten. Any other store error stops the call, leaving the slots
/// already filled in place.
///
/// # Example
///
/// ```
/// use tessera_protocol::config::BASE_ASSET_ID;
/// use tessera_protocol::crypto::keys::DerivationPath;
/// use tessera_protocol::transaction::{
///     sign, sign_progress, MemoryKeyStore, RequiredKey, SigningInstruction, TxBuilder,
/// };
/// use tessera_protocol::types::{Hash, OutputCommitment, TxInput, TxOutput};
///
/// let store = MemoryKeyStore::new();
/// let ours = store.create_key("ours", "pw").unwrap();
/// let theirs = MemoryKeyStore::new().create_key("theirs", "pw").unwrap();
///
/// let path = DerivationPath::new(vec![1, 1, 1]);
/// let keys = vec![RequiredKey::new(ours, path.clone()), RequiredKey::new(theirs, path)];
/// let instruction = SigningInstruction::new(keys, 2).unwrap();
/// let program = instruction.control_program().unwrap();
/// let spent = OutputCommitment::new(BASE_ASSET_ID, 100, program);
/// let mut template = TxBuilder::new()
///     .timestamp(1)
///     .input(TxInput::new(Hash([7; 32]), 0, spent), instruction)
///     .output(TxOutput::new(BASE_ASSET_ID, 90, vec![0x51]))
///     .build()
///     .unwrap();
///
/// assert_eq!(sign(&mut template, "wrong", &store).unwrap(), 0);
/// assert_eq!(sign(&mut template, "pw", &store).unwrap(), 1);
/// assert_eq!(template.signature_counts(), vec![1]);
/// assert!(!sign_progress(&template));
///
/// // Our slot is filled already.
/// assert_eq!(sign(&mut template, "pw", &store).unwrap(), 0);
/// ```
pub fn sign<S>(
    template: &mut TransactionTemplate,
    password: &str,
    store: &S,
) -> Result<usize, SigningError>
where
    S: KeyStore + ?Sized,
{
    template.check_instruction_count()?;
    let mapped = template.tx().map()?;
    let mut filled = 0;
    for (input, instruction) in template.instructions_mut().iter_mut().enumerate() {
        if !instruction.is_well_formed() {
            return Err(SigningError::InvalidInstruction { input });
        }
        let pending = instruction.pending();
        filled += sign_pending(
            input,
            &mapped.sig_hashes[input],
            pending,
            password,
            store,
            |slot, sig| instruction.fill(slot, sig),
        )?;
    }
    Ok(filled)
}

/// `true` iff every input has at least its quorum of filled slots.
pub fn sign_progress(template: &TransactionTemplate) -> bool {
    template
        .signing_instructions()
        .iter()
        .all(SigningInstruction::is_satisfied)
}

// ---------------------------------------------------------------------------
// SharedTemplate
// ---------------------------------------------------------------------------

/// A template shared by concurrent signing sessions, locked per input.
#[derive(Debug)]
pub struct SharedTemplate {
    tx: TxData,
    sig_hashes: Vec<Hash>,
    instructions: Vec<Mutex<SigningInstruction>>,
}

impl SharedTemplate {
    pub fn new(template: TransactionTemplate) -> Result<Self, SigningError> {
        template.check_instruction_count()?;
        let mapped = template.tx().map()?;
        let (tx, instructions) = template.into_parts();
        for (input, instruction) in instructions.iter().enumerate() {
            if !instruction.is_well_formed() {
                return Err(SigningError::InvalidInstruction { input });
            }
        }
        Ok(Self {
            tx,
            sig_hashes: mapped.sig_hashes,
            instructions: instructions.into_iter().map(Mutex::new).collect(),
        })
    }

    /// Like [`sign`], over every input in order.
    pub fn sign<S>(&self, password: &str, store: &S) -> Result<usize, SigningError>
    where
        S: KeyStore + ?Sized,
    {
        let mut filled = 0;
        for input in 0..self.instructions.len() {
            filled += self.sign_input(input, password, store)?;
        }
        Ok(filled)
    }

    /// Signs one input. Sessions working on different inputs never contend.
    pub fn sign_input<S>(&self, input: usize, password: &str, store: &S) -> Result<usize, SigningError>
    where
        S: KeyStore + ?Sized,
    {
        let (lock, sig_hash) = self
            .instructions
            .get(input)
            .zip(self.sig_hashes.get(input))
            .ok_or(SigningError::NoSuchInput {
                input,
                inputs: self.instructions.len(),
            })?;
        let pending = lock.lock().pending();
        sign_pending(
            input,
            sig_hash,
            pending,
            password,
            store,
            |slot, sig| lock.lock().fill(slot, sig),
        )
    }

    pub fn sign_progress(&self) -> bool {
        self.instructions.iter().all(|i| i.lock().is_satisfied())
    }

    /// A consistent copy of the current state.
    pub fn snapshot(&self) -> TransactionTemplate {
        let instructions = self.instructions.iter().map(|i| i.lock().clone()).collect();
        TransactionTemplate::from_parts(self.tx.clone(), instructions)
    }

    pub fn into_template(self) -> TransactionTemplate {
        let instructions = self
            .instructions
            .into_iter()
            .map(Mutex::into_inner)
            .collect();
        TransactionTemplate::from_parts(self.tx, instructions)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
