//! Message signing and verification for receiving addresses.
//!
//! Signing resolves the address to its account and key path, derives the
//! cosigner key set along that path, and asks the key store to sign the
//! raw message bytes with the primary (first) cosigner key. The response
//! carries the derived key actually used so a verifier holding only public
//! material can check the claim.
//!
//! Verification first recomputes the pubkey-hash address of the derived
//! key and requires it to equal the claimed address; only then is the
//! signature itself checked. Either check failing is a plain `false`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::{AccountError, AccountManager};
use crate::address::Address;
use crate::config::Network;
use crate::crypto::keys::{derive_set, Signature, XPub};
use crate::transaction::{KeyStore, KeyStoreError};

#[derive(Debug, Error)]
pub enum MessageError {
    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    /// The signature is not 64 bytes of hex.
    #[error("malformed signature encoding")]
    SignatureEncoding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignMessageResponse {
    /// Hex-encoded signature.
    pub signature: String,
    pub derived_xpub: XPub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyMessageResponse {
    pub result: bool,
}

/// Signs `message` with the key behind `address`.
pub fn sign_message<S>(
    accounts: &AccountManager,
    store: &S,
    address: &str,
    message: &[u8],
    password: &str,
) -> Result<SignMessageResponse, MessageError>
where
    S: KeyStore + ?Sized,
{
    let cp = accounts.control_program_by_address(address)?;
    let account = accounts.account_by_program(&cp.control_program)?;
    let signer = &account.signer;

    let path = signer.path(cp.key_index);
    let derived = derive_set(signer.xpubs(), &path);
    let signature = store.xsign(&signer.xpubs()[0], &path, message, password)?;

    Ok(SignMessageResponse {
        signature: signature.to_hex(),
        derived_xpub: derived[0],
    })
}

/// Checks a [`sign_message`] response against `address`.
pub fn verify_message(
    network: Network,
    address: &str,
    derived_xpub: &XPub,
    message: &[u8],
    signature_hex: &str,
) -> Result<VerifyMessageResponse, MessageError> {
    let signature =
        Signature::from_hex(signature_hex.trim()).map_err(|_| MessageError::SignatureEncoding)?;

    let expected = Address::from_public_key(network, &derived_xpub.public_key()).encode();
    if expected != address.trim() {
        return Ok(VerifyMessageResponse { result: false });
    }

    Ok(VerifyMessageResponse {
        result: derived_xpub.verify(message, signature.as_bytes()),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
