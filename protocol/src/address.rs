//! # Addresses
//!
//! The human-facing form of a control program. Two kinds exist:
//!
//! | Kind | Payload | Program |
//! |---|---|---|
//! | pubkey hash | 20-byte BLAKE3 pubkey hash | pay-to-pubkey-hash |
//! | program hash | 32-byte SHA3-256 of the program | M-of-N multisig |
//!
//! Both are bech32 strings under the network HRP (`ts1...`, `tts1...`,
//! `rts1...`). The payload length tells the kinds apart.

use bech32::{Bech32, Hrp};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::Network;
use crate::crypto::hash::{pubkey_hash, sha3_256, PUBKEY_HASH_LENGTH};
use crate::vm::{p2pkh_program, parse_p2pkh};

/// Errors that can occur while parsing an address.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The string is not valid bech32.
    #[error("bech32 decode error: {0}")]
    Bech32Decode(String),

    /// The HRP does not belong to any known network.
    #[error("unknown address prefix '{0}'")]
    UnknownHrp(String),

    /// The HRP belongs to a different network than expected.
    #[error("address is for {got:?}, expected {expected:?}")]
    WrongNetwork { expected: Network, got: Network },

    /// The payload is neither a pubkey hash nor a program hash.
    #[error("invalid address payload length {0}")]
    InvalidPayloadLength(usize),
}

/// What an address commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressPayload {
    PubKeyHash([u8; PUBKEY_HASH_LENGTH]),
    ProgramHash([u8; 32]),
}

/// A network-qualified address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub network: Network,
    pub payload: AddressPayload,
}

impl Address {
    /// Address of the pay-to-pubkey-hash program for `public_key`.
    pub fn from_public_key(network: Network, public_key: &[u8]) -> Self {
        Self {
            network,
            payload: AddressPayload::PubKeyHash(pubkey_hash(public_key)),
        }
    }

    /// Address of an arbitrary control program. A pay-to-pubkey-hash
    /// program maps to its pubkey hash, anything else to its SHA3 digest.
    pub fn from_program(network: Network, program: &[u8]) -> Self {
        let payload = match parse_p2pkh(program) {
            Some(hash) => AddressPayload::PubKeyHash(hash),
            None => AddressPayload::ProgramHash(sha3_256(program)),
        };
        Self { network, payload }
    }

    /// The bech32 string.
    pub fn encode(&self) -> String {
        let hrp = Hrp::parse(self.network.hrp()).expect("static HRP is valid");
        let data: &[u8] = match &self.payload {
            AddressPayload::PubKeyHash(h) => h,
            AddressPayload::ProgramHash(h) => h,
        };
        bech32::encode::<Bech32>(hrp, data)
            .expect("encoding a short fixed-size payload should never fail")
    }

    /// Parses a bech32 address of any known network. Surrounding
    /// whitespace is ignored.
    pub fn decode(addr: &str) -> Result<Self, AddressError> {
        let (hrp, data) = bech32::decode(addr.trim())
            .map_err(|e| AddressError::Bech32Decode(e.to_string()))?;
        let hrp = hrp.to_lowercase();
        let network = Network::from_hrp(&hrp).ok_or(AddressError::UnknownHrp(hrp))?;

        let payload = match data.len() {
            PUBKEY_HASH_LENGTH => {
                let mut h = [0u8; PUBKEY_HASH_LENGTH];
                h.copy_from_slice(&data);
                AddressPayload::PubKeyHash(h)
            }
            32 => {
                let mut h = [0u8; 32];
                h.copy_from_slice(&data);
                AddressPayload::ProgramHash(h)
            }
            n => return Err(AddressError::InvalidPayloadLength(n)),
        };
        Ok(Self { network, payload })
    }

    /// Parses and checks the network in one step.
    pub fn decode_for(network: Network, addr: &str) -> Result<Self, AddressError> {
        let address = Self::decode(addr)?;
        if address.network != network {
            return Err(AddressError::WrongNetwork {
                expected: network,
                got: address.network,
            });
        }
        Ok(address)
    }

    /// The control program for a pubkey-hash address. Program-hash
    /// addresses cannot be expanded without the program itself.
    pub fn p2pkh_program(&self) -> Option<Vec<u8>> {
        match &self.payload {
            AddressPayload::PubKeyHash(h) => Some(p2pkh_program(h)),
            AddressPayload::ProgramHash(_) => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::multisig_program;

    #[test]
    fn pubkey_address_roundtrip() {
        let addr = Address::from_public_key(Network::Testnet, &[3u8; 32]);
        let s = addr.encode();
        assert!(s.starts_with("tts1"));
        assert_eq!(Address::decode(&s).unwrap(), addr);
        assert_eq!(Address::decode(&format!("  {}\n", s)).unwrap(), addr);
    }

    #[test]
    fn program_address_matches_kind() {
        let pk = [3u8; 32];
        let p2pkh = p2pkh_program(&pubkey_hash(&pk));
        assert_eq!(
            Address::from_program(Network::Mainnet, &p2pkh),
            Address::from_public_key(Network::Mainnet, &pk)
        );

        let multisig = multisig_program(&[[1u8; 32], [2u8; 32]], 1).unwrap();
        let addr = Address::from_program(Network::Mainnet, &multisig);
        assert!(matches!(addr.payload, AddressPayload::ProgramHash(_)));
        assert!(addr.p2pkh_program().is_none());
        assert_eq!(Address::decode(&addr.encode()).unwrap(), addr);
    }

    #[test]
    fn wrong_network_is_rejected() {
        let s = Address::from_public_key(Network::Regtest, &[3u8; 32]).encode();
        assert_eq!(
            Address::decode_for(Network::Mainnet, &s).unwrap_err(),
            AddressError::WrongNetwork {
                expected: Network::Mainnet,
                got: Network::Regtest
            }
        );
    }

    #[test]
    fn foreign_hrp_and_bad_checksum_fail() {
        let hrp = Hrp::parse("bc").unwrap();
        let foreign = bech32::encode::<Bech32>(hrp, &[0u8; 20]).unwrap();
        assert!(matches!(
            Address::decode(&foreign),
            Err(AddressError::UnknownHrp(_))
        ));

        let mut s = Address::from_public_key(Network::Mainnet, &[3u8; 32]).encode();
        let last = s.pop().unwrap();
        s.push(if last == 'q' { 'p' } else { 'q' });
        assert!(matches!(
            Address::decode(&s),
            Err(AddressError::Bech32Decode(_))
        ));
    }
}
