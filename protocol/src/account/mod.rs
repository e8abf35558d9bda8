//! # Accounts
//!
//! The minimal wallet records the signing protocol needs: who may sign for
//! an output ([`Signer`]), which program and address a receiving key index
//! maps to ([`ControlProgram`]), and the spendable outputs themselves
//! ([`Utxo`]).
//!
//! ## Key paths
//!
//! A signer derives every cosigner's key along the same path, so the i-th
//! derived key always belongs to the i-th cosigner:
//!
//! ```text
//! account key space:  [0, account_index]
//! address key space:  [1, account_index, key_index]
//! ```
//!
//! Single-key signers get pay-to-pubkey-hash programs; anything else gets
//! an M-of-N multisig program.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::address::Address;
use crate::config::{Network, MAX_MULTISIG_KEYS};
use crate::crypto::keys::{DerivationPath, XPub};
use crate::encoding::CodecError;
use crate::transaction::{RequiredKey, SigningError, SigningInstruction};
use crate::types::{AssetId, Hash, OutputCommitment, TxInput};
use crate::vm::VmError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("invalid quorum {m}-of-{n}")]
    InvalidQuorum { m: usize, n: usize },

    #[error("signer lists the same xpub twice")]
    DuplicateXPub,

    #[error("account alias '{0}' already exists")]
    DuplicateAlias(String),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("no control program for address {0}")]
    AddressNotFound(String),

    #[error("no account owns this control program")]
    ProgramNotFound,

    #[error("key index space exhausted")]
    KeyIndexExhausted,

    /// The UTXO's program is not one the signer derives.
    #[error("control program does not belong to this signer")]
    ProgramMismatch,

    #[error(transparent)]
    Vm(#[from] VmError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// Which derivation layout a signer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeySpace {
    /// One key set for the whole account.
    Account,
    /// A fresh key set per receiving address.
    Address,
}

impl KeySpace {
    pub fn marker(&self) -> u32 {
        match self {
            KeySpace::Account => 0,
            KeySpace::Address => 1,
        }
    }
}

/// Ordered cosigner keys with an M-of-N quorum. Fixed at account creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    xpubs: Vec<XPub>,
    quorum: usize,
    account_index: u32,
    key_space: KeySpace,
}

impl Signer {
    pub fn new(
        xpubs: Vec<XPub>,
        quorum: usize,
        account_index: u32,
        key_space: KeySpace,
    ) -> Result<Self, AccountError> {
        let n = xpubs.len();
        if quorum == 0 || quorum > n || n > MAX_MULTISIG_KEYS {
            return Err(AccountError::InvalidQuorum { m: quorum, n });
        }
        let mut sorted = xpubs.clone();
        sorted.sort();
        sorted.dedup();
        if sorted.len() != n {
            return Err(AccountError::DuplicateXPub);
        }
        Ok(Self {
            xpubs,
            quorum,
            account_index,
            key_space,
        })
    }

    pub fn xpubs(&self) -> &[XPub] {
        &self.xpubs
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn account_index(&self) -> u32 {
        self.account_index
    }

    pub fn key_space(&self) -> KeySpace {
        self.key_space
    }

    /// The path used for receiving key `key_index`. The account key space
    /// ignores `key_index`.
    pub fn path(&self, key_index: u32) -> DerivationPath {
        let marker = self.key_space.marker();
        match self.key_space {
            KeySpace::Account => DerivationPath::new(vec![marker, self.account_index]),
            KeySpace::Address => DerivationPath::new(vec![marker, self.account_index, key_index]),
        }
    }

    /// The signing instruction for an output received at `key_index`.
    pub fn signing_instruction(&self, key_index: u32) -> Result<SigningInstruction, AccountError> {
        let path = self.path(key_index);
        let keys = self
            .xpubs
            .iter()
            .map(|xpub| RequiredKey::new(*xpub, path.clone()))
            .collect();
        Ok(SigningInstruction::new(keys, self.quorum)?)
    }

    /// The control program for receiving key `key_index`.
    pub fn control_program(&self, key_index: u32) -> Result<Vec<u8>, AccountError> {
        Ok(self.signing_instruction(key_index)?.control_program()?)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub alias: String,
    pub signer: Signer,
}

/// A receiving program minted for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlProgram {
    pub account_id: String,
    pub address: String,
    pub key_index: u32,
    #[serde(with = "hex")]
    pub control_program: Vec<u8>,
}

/// A spendable output owned by an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub output_id: Hash,
    pub source_id: Hash,
    pub source_position: u64,
    pub asset_id: AssetId,
    pub amount: u64,
    #[serde(with = "hex")]
    pub control_program: Vec<u8>,
    /// Suffix carried by the creating output's commitment.
    #[serde(with = "hex", default)]
    pub suffix: Vec<u8>,
    pub account_id: String,
    pub key_index: u32,
}

impl Utxo {
    /// Records output `source_position` of transaction `source_id`,
    /// computing its output id.
    pub fn new(
        source_id: Hash,
        source_position: u64,
        asset_id: AssetId,
        amount: u64,
        control_program: Vec<u8>,
        account_id: String,
        key_index: u32,
    ) -> Result<Self, CodecError> {
        let mut utxo = Self {
            output_id: Hash::default(),
            source_id,
            source_position,
            asset_id,
            amount,
            control_program,
            suffix: Vec::new(),
            account_id,
            key_index,
        };
        utxo.output_id = utxo.input().spent_output_id()?;
        Ok(utxo)
    }

    /// Replaces the commitment suffix and recomputes the output id.
    pub fn with_suffix(mut self, suffix: Vec<u8>) -> Result<Self, CodecError> {
        self.suffix = suffix;
        self.output_id = self.input().spent_output_id()?;
        Ok(self)
    }

    fn input(&self) -> TxInput {
        TxInput::new(
            self.source_id,
            self.source_position,
            OutputCommitment::new(self.asset_id, self.amount, self.control_program.clone()),
        )
        .with_suffix(self.suffix.clone())
    }
}

/// The input spending `utxo` and the instruction telling `signer`'s
/// cosigners how to authorize it.
pub fn utxo_to_input(
    signer: &Signer,
    utxo: &Utxo,
) -> Result<(TxInput, SigningInstruction), AccountError> {
    let instruction = signer.signing_instruction(utxo.key_index)?;
    if instruction.control_program()? != utxo.control_program {
        return Err(AccountError::ProgramMismatch);
    }
    Ok((utxo.input(), instruction))
}

// ---------------------------------------------------------------------------
// AccountManager
// ---------------------------------------------------------------------------

struct AccountEntry {
    account: Account,
    last_key_index: u32,
}

/// In-memory account registry.
pub struct AccountManager {
    network: Network,
    accounts: DashMap<String, AccountEntry>,
    aliases: DashMap<String, String>,
    by_address: DashMap<String, ControlProgram>,
    by_program: DashMap<Vec<u8>, String>,
    next_account_index: AtomicU32,
}

impl AccountManager {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            accounts: DashMap::new(),
            aliases: DashMap::new(),
            by_address: DashMap::new(),
            by_program: DashMap::new(),
            next_account_index: AtomicU32::new(1),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Registers an account for the given cosigner keys.
    pub fn create_account(
        &self,
        xpubs: Vec<XPub>,
        quorum: usize,
        alias: &str,
        key_space: KeySpace,
    ) -> Result<Account, AccountError> {
        let account_index = self.next_account_index.fetch_add(1, Ordering::SeqCst);
        let signer = Signer::new(xpubs, quorum, account_index, key_space)?;
        let account = Account {
            id: Uuid::new_v4().to_string(),
            alias: alias.to_string(),
            signer,
        };

        match self.aliases.entry(alias.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(AccountError::DuplicateAlias(alias.to_string()));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(account.id.clone());
            }
        }
        self.accounts.insert(
            account.id.clone(),
            AccountEntry {
                account: account.clone(),
                last_key_index: 0,
            },
        );
        debug!(account = %account.id, alias, account_index, "account created");
        Ok(account)
    }

    /// Mints the next receiving program. Key indices start at 1 and
    /// strictly increase per account.
    ///
    /// An account whose signer uses [`KeySpace::Account`] derives every key
    /// from `[0, account_index]`, so each call returns the same program and
    /// address under a fresh key index. The `by_address` entry for that
    /// address is overwritten and resolves to the newest key index.
    pub fn create_address(&self, account_id: &str) -> Result<ControlProgram, AccountError> {
        let (signer, key_index) = {
            let mut entry = self
                .accounts
                .get_mut(account_id)
                .ok_or_else(|| AccountError::AccountNotFound(account_id.to_string()))?;
            let next = entry
                .last_key_index
                .checked_add(1)
                .ok_or(AccountError::KeyIndexExhausted)?;
            entry.last_key_index = next;
            (entry.account.signer.clone(), next)
        };

        let program = signer.control_program(key_index)?;
        let address = Address::from_program(self.network, &program).encode();
        let cp = ControlProgram {
            account_id: account_id.to_string(),
            address: address.clone(),
            key_index,
            control_program: program.clone(),
        };
        self.by_address.insert(address.clone(), cp.clone());
        self.by_program.insert(program, account_id.to_string());
        debug!(account = account_id, key_index, address = %address, "address created");
        Ok(cp)
    }

    pub fn account(&self, account_id: &str) -> Result<Account, AccountError> {
        self.accounts
            .get(account_id)
            .map(|e| e.account.clone())
            .ok_or_else(|| AccountError::AccountNotFound(account_id.to_string()))
    }

    pub fn account_by_alias(&self, alias: &str) -> Result<Account, AccountError> {
        let id = self
            .aliases
            .get(alias)
            .map(|id| id.clone())
            .ok_or_else(|| AccountError::AccountNotFound(alias.to_string()))?;
        self.account(&id)
    }

    /// The program minted for `address`. Surrounding whitespace is ignored.
    pub fn control_program_by_address(&self, address: &str) -> Result<ControlProgram, AccountError> {
        let address = address.trim();
        self.by_address
            .get(address)
            .map(|cp| cp.clone())
            .ok_or_else(|| AccountError::AddressNotFound(address.to_string()))
    }

    pub fn account_by_program(&self, program: &[u8]) -> Result<Account, AccountError> {
        let id = self
            .by_program
            .get(program)
            .map(|id| id.clone())
            .ok_or(AccountError::ProgramNotFound)?;
        self.account(&id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BASE_ASSET_ID;
    use crate::crypto::keys::XPrv;

    fn xpub(seed: &[u8]) -> XPub {
        XPrv::from_seed(seed).xpub()
    }

    #[test]
    fn signer_enforces_quorum_and_distinct_keys() {
        let a = xpub(b"a");
        let b = xpub(b"b");
        assert!(matches!(
            Signer::new(vec![a, b], 3, 1, KeySpace::Address),
            Err(AccountError::InvalidQuorum { m: 3, n: 2 })
        ));
        assert!(matches!(
            Signer::new(vec![a, a], 1, 1, KeySpace::Address),
            Err(AccountError::DuplicateXPub)
        ));
        Signer::new(vec![a, b], 2, 1, KeySpace::Address).unwrap();
    }

    #[test]
    fn paths_follow_key_space() {
        let a = xpub(b"a");
        let account = Signer::new(vec![a], 1, 7, KeySpace::Account).unwrap();
        assert_eq!(account.path(3).indices(), &[0, 7]);
        let address = Signer::new(vec![a], 1, 7, KeySpace::Address).unwrap();
        assert_eq!(address.path(3).indices(), &[1, 7, 3]);
    }

    #[test]
    fn account_key_space_reuses_one_address() {
        let manager = AccountManager::new(Network::Testnet);
        let account = manager
            .create_account(vec![xpub(b"a")], 1, "cold", KeySpace::Account)
            .unwrap();
        let first = manager.create_address(&account.id).unwrap();
        let second = manager.create_address(&account.id).unwrap();
        assert_eq!(first.address, second.address);
        assert_eq!(first.control_program, second.control_program);
        assert_eq!(second.key_index, 2);

        let found = manager.control_program_by_address(&first.address).unwrap();
        assert_eq!(found.key_index, 2);
    }

    #[test]
    fn addresses_strictly_increase_and_resolve() {
        let manager = AccountManager::new(Network::Testnet);
        let account = manager
            .create_account(vec![xpub(b"a")], 1, "alice", KeySpace::Address)
            .unwrap();
        let first = manager.create_address(&account.id).unwrap();
        let second = manager.create_address(&account.id).unwrap();
        assert_eq!(first.key_index, 1);
        assert_eq!(second.key_index, 2);
        assert_ne!(first.address, second.address);
        assert!(first.address.starts_with("tts1"));

        let found = manager
            .control_program_by_address(&format!(" {} ", second.address))
            .unwrap();
        assert_eq!(found, second);
        assert_eq!(
            manager.account_by_program(&second.control_program).unwrap(),
            account
        );
        assert_eq!(manager.account_by_alias("alice").unwrap(), account);
    }

    #[test]
    fn duplicate_alias_and_unknown_ids_fail() {
        let manager = AccountManager::new(Network::Mainnet);
        manager
            .create_account(vec![xpub(b"a")], 1, "alice", KeySpace::Address)
            .unwrap();
        assert!(matches!(
            manager.create_account(vec![xpub(b"b")], 1, "alice", KeySpace::Address),
            Err(AccountError::DuplicateAlias(_))
        ));
        assert!(matches!(
            manager.create_address("missing"),
            Err(AccountError::AccountNotFound(_))
        ));
        assert!(matches!(
            manager.account_by_program(&[0x51]),
            Err(AccountError::ProgramNotFound)
        ));
    }

    #[test]
    fn utxo_to_input_checks_ownership() {
        let signer = Signer::new(vec![xpub(b"a"), xpub(b"b")], 2, 1, KeySpace::Address).unwrap();
        let program = signer.control_program(4).unwrap();
        let utxo = Utxo::new(
            Hash([1u8; 32]),
            0,
            BASE_ASSET_ID,
            10,
            program,
            "acct".into(),
            4,
        )
        .unwrap();

        let (input, instruction) = utxo_to_input(&signer, &utxo).unwrap();
        assert_eq!(input.spent_output_id().unwrap(), utxo.output_id);
        assert_eq!(instruction.quorum(), 2);
        assert_eq!(instruction.keys().len(), 2);

        let suffixed = utxo.clone().with_suffix(vec![0x01]).unwrap();
        assert_ne!(suffixed.output_id, utxo.output_id);
        let (input, _) = utxo_to_input(&signer, &suffixed).unwrap();
        assert_eq!(input.suffix, vec![0x01]);
        assert_eq!(input.spent_output_id().unwrap(), suffixed.output_id);

        let wrong_index = Utxo { key_index: 5, ..utxo };
        assert!(matches!(
            utxo_to_input(&signer, &wrong_index),
            Err(AccountError::ProgramMismatch)
        ));
    }
}
