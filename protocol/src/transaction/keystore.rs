//! In-memory, password-gated key store.
//!
//! Each root key is held with its own salted password digest. A signing
//! request for a key this store does not hold, or with the wrong password
//! for a key it does hold, is answered with
//! [`KeyStoreError::KeyNotControlled`]: in either case this session does
//! not control the key, and [`super::signing::sign`] moves on to the next
//! slot. Several parties can therefore each unlock their own keys in one
//! store and sign the same template in turn.

use std::collections::HashMap;

use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info};

use super::signing::{KeyStore, KeyStoreError};
use crate::config::PASSWORD_CONTEXT;
use crate::crypto::hash::domain_separated_hash_multi;
use crate::crypto::keys::{DerivationPath, Signature, XPrv, XPub};

struct StoredKey {
    alias: String,
    xprv: XPrv,
    salt: [u8; 16],
    password_digest: [u8; 32],
}

impl StoredKey {
    fn new(alias: String, xprv: XPrv, password: &str) -> Self {
        let mut salt = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        let password_digest = digest(&salt, password);
        Self {
            alias,
            xprv,
            salt,
            password_digest,
        }
    }

    fn unlocks_with(&self, password: &str) -> bool {
        digest(&self.salt, password) == self.password_digest
    }
}

fn digest(salt: &[u8], password: &str) -> [u8; 32] {
    domain_separated_hash_multi(PASSWORD_CONTEXT, &[salt, password.as_bytes()])
}

/// Root keys indexed by their extended public key.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<XPub, StoredKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a fresh root key under `alias`.
    pub fn create_key(&self, alias: &str, password: &str) -> Result<XPub, KeyStoreError> {
        self.import_key(XPrv::generate(), alias, password)
    }

    /// Adds an existing root key under `alias`.
    pub fn import_key(&self, xprv: XPrv, alias: &str, password: &str) -> Result<XPub, KeyStoreError> {
        let xpub = xprv.xpub();
        let mut keys = self.keys.write();
        if keys.values().any(|k| k.alias == alias) {
            return Err(KeyStoreError::DuplicateAlias(alias.to_string()));
        }
        if keys.contains_key(&xpub) {
            return Err(KeyStoreError::DuplicateKey);
        }
        keys.insert(xpub, StoredKey::new(alias.to_string(), xprv, password));
        info!(alias, xpub = %xpub, "key added to store");
        Ok(xpub)
    }

    /// Every held root key, ordered by alias.
    pub fn xpubs(&self) -> Vec<(String, XPub)> {
        let mut all: Vec<(String, XPub)> = self
            .keys
            .read()
            .iter()
            .map(|(xpub, k)| (k.alias.clone(), *xpub))
            .collect();
        all.sort();
        all
    }

    pub fn contains(&self, xpub: &XPub) -> bool {
        self.keys.read().contains_key(xpub)
    }
}

impl KeyStore for MemoryKeyStore {
    fn xsign(
        &self,
        root_xpub: &XPub,
        path: &DerivationPath,
        data: &[u8],
        password: &str,
    ) -> Result<Signature, KeyStoreError> {
        // Derive and sign outside the lock.
        let xprv = {
            let keys = self.keys.read();
            let Some(stored) = keys.get(root_xpub) else {
                return Err(KeyStoreError::KeyNotControlled);
            };
            if !stored.unlocks_with(password) {
                debug!(alias = %stored.alias, "password does not unlock key");
                return Err(KeyStoreError::KeyNotControlled);
            }
            stored.xprv.clone()
        };
        xprv.derive_path(path)
            .sign(data)
            .map_err(|e| KeyStoreError::Backend(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
