//! # Transaction Module
//!
//! Construction and cooperative signing of transactions.
//!
//! ## Architecture
//!
//! ```text
//! builder.rs   TxBuilder and TransactionTemplate (finalize, merge)
//! signing.rs   SigningInstruction, KeyStore contract, sign, SharedTemplate
//! keystore.rs  In-memory password-gated KeyStore
//! ```
//!
//! ## Template Lifecycle
//!
//! 1. **Build**: [`TxBuilder`] pairs each input with the instruction of the
//!    signer that owns the spent output.
//! 2. **Sign**: each party calls [`sign`] with its own [`KeyStore`]; or
//!    templates signed in separate processes are combined with
//!    [`TransactionTemplate::merge`].
//! 3. **Finalize**: once [`sign_progress`] is true,
//!    [`TransactionTemplate::finalize`] writes the witnesses.
//! 4. **Validate**: [`crate::validation::validate_tx`] re-checks every
//!    signature against the control programs.

pub mod builder;
pub mod keystore;
pub mod signing;

pub use builder::{BuildError, TransactionTemplate, TxBuilder};
pub use keystore::MemoryKeyStore;
pub use signing::{
    sign, sign_progress, KeyStore, KeyStoreError, RequiredKey, SharedTemplate, SigningError,
    SigningInstruction, SlotConflict,
};
