// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tessera Protocol: Core Library
//!
//! Multi-asset UTXO transactions authorized by programs, signed
//! cooperatively by M-of-N hierarchical keys.
//!
//! ## Architecture
//!
//! - **types**: Hashes, asset ids, output commitments and the transaction
//!   data model with its canonical encoding.
//! - **encoding**: varint63, varstr31 and extensible-string primitives.
//! - **crypto**: SHA3 and BLAKE3 hashing, hierarchical Ed25519 keys.
//! - **vm**: The control-program interpreter and program builders.
//! - **transaction**: Templates, signing instructions, key stores and the
//!   sign / merge / finalize lifecycle.
//! - **account**: Multi-signer accounts, address issuance, UTXO-to-input
//!   conversion.
//! - **address**: Bech32 receiving addresses.
//! - **message**: Signing and verifying arbitrary messages by address.
//! - **validation**: Admission checks against a UTXO snapshot.
//! - **config**: Protocol constants, consensus parameters, config files.
//! - **logging**: `tracing` subscriber setup.
//!
//! ## Design Philosophy
//!
//! 1. Ids are pure functions of canonical bytes. Two nodes never disagree.
//! 2. Private keys stay behind the [`transaction::KeyStore`] boundary.
//! 3. Validation is read-only and safe to run in parallel.

pub mod account;
pub mod address;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod logging;
pub mod message;
pub mod transaction;
pub mod types;
pub mod validation;
pub mod vm;
