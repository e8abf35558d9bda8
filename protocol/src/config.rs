//! # Protocol Configuration & Constants
//!
//! Every consensus constant lives here: versions, size limits, domain tags
//! for the hash constructions and the per-network address prefixes.
//! Changing any of them after launch forks the network.
//!
//! Values a deployment may tune (size limit, accepted versions) are carried
//! at runtime by [`ConsensusParams`] and handed to the validator through
//! its context. [`ProtocolConfig`] bundles them with the network and the
//! logging settings and loads from a JSON document.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogFormat;
use crate::types::AssetId;

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// Transaction format version produced by the builder.
pub const TX_VERSION: u64 = 1;

/// Asset version whose commitment fields this codec understands.
pub const ASSET_VERSION: u64 = 1;

/// VM version of every control program this crate builds or executes.
pub const VM_VERSION: u64 = 1;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Default maximum serialized transaction size: 1 MiB.
pub const DEFAULT_MAX_TX_SIZE: u64 = 1_048_576;

/// Upper bound on N for an M-of-N signer.
pub const MAX_MULTISIG_KEYS: usize = 20;

/// The network's fee-paying base asset.
pub const BASE_ASSET_ID: AssetId = AssetId([0xff; 32]);

// ---------------------------------------------------------------------------
// Domain tags
// ---------------------------------------------------------------------------

/// SHA3 tag for transaction ids.
pub const TXID_TAG: &[u8] = b"tessera:txid";

/// SHA3 tag for output ids.
pub const OUTPUT_ID_TAG: &[u8] = b"tessera:output";

/// BLAKE3 `derive_key` context for per-input signature hashes.
pub const SIGHASH_CONTEXT: &str = "tessera 2026 tx sighash";

/// BLAKE3 `derive_key` context for key-store password digests.
pub const PASSWORD_CONTEXT: &str = "tessera 2026 keystore password";

// ---------------------------------------------------------------------------
// Networks
// ---------------------------------------------------------------------------

/// Bech32 HRP for mainnet addresses.
pub const MAINNET_HRP: &str = "ts";

/// Bech32 HRP for testnet addresses.
pub const TESTNET_HRP: &str = "tts";

/// Bech32 HRP for regtest addresses.
pub const REGTEST_HRP: &str = "rts";

/// Which network an address belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn hrp(&self) -> &'static str {
        match self {
            Network::Mainnet => MAINNET_HRP,
            Network::Testnet => TESTNET_HRP,
            Network::Regtest => REGTEST_HRP,
        }
    }

    /// Reverse lookup of [`hrp`](Self::hrp).
    pub fn from_hrp(hrp: &str) -> Option<Self> {
        match hrp {
            MAINNET_HRP => Some(Network::Mainnet),
            TESTNET_HRP => Some(Network::Testnet),
            REGTEST_HRP => Some(Network::Regtest),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ConsensusParams
// ---------------------------------------------------------------------------

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid JSON for [`ProtocolConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A parameter is outside its permitted range.
    #[error("invalid consensus parameter: {0}")]
    Invalid(&'static str),
}

/// Tunable consensus parameters supplied to every validation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusParams {
    /// Maximum serialized transaction size in bytes.
    pub max_tx_size: u64,
    pub supported_tx_versions: Vec<u64>,
    pub supported_asset_versions: Vec<u64>,
    pub supported_vm_versions: Vec<u64>,
    pub base_asset_id: AssetId,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            max_tx_size: DEFAULT_MAX_TX_SIZE,
            supported_tx_versions: vec![TX_VERSION],
            supported_asset_versions: vec![ASSET_VERSION],
            supported_vm_versions: vec![VM_VERSION],
            base_asset_id: BASE_ASSET_ID,
        }
    }
}

impl ConsensusParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tx_size == 0 {
            return Err(ConfigError::Invalid("max_tx_size must be non-zero"));
        }
        if self.supported_tx_versions.is_empty() {
            return Err(ConfigError::Invalid("no supported transaction versions"));
        }
        if self.supported_asset_versions.is_empty() {
            return Err(ConfigError::Invalid("no supported asset versions"));
        }
        if self.supported_vm_versions.is_empty() {
            return Err(ConfigError::Invalid("no supported VM versions"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ProtocolConfig
// ---------------------------------------------------------------------------

/// Top-level configuration document.
///
/// ```json
/// {
///   "network": "testnet",
///   "consensus": { "max_tx_size": 65536 },
///   "log_level": "debug",
///   "log_format": "json"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub network: Network,
    pub consensus: ConsensusParams,
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            consensus: ConsensusParams::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl ProtocolConfig {
    /// Parses and validates a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ProtocolConfig = serde_json::from_str(json)?;
        config.consensus.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_constants() {
        let params = ConsensusParams::default();
        assert_eq!(params.max_tx_size, DEFAULT_MAX_TX_SIZE);
        assert_eq!(params.supported_vm_versions, vec![VM_VERSION]);
        assert_eq!(params.base_asset_id, BASE_ASSET_ID);
        params.validate().unwrap();
    }

    #[test]
    fn zero_size_limit_is_invalid() {
        let params = ConsensusParams {
            max_tx_size: 0,
            ..ConsensusParams::default()
        };
        assert!(matches!(params.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn partial_document_fills_defaults() {
        let config = ProtocolConfig::from_json_str(
            r#"{"network":"testnet","consensus":{"max_tx_size":4096}}"#,
        )
        .unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.consensus.max_tx_size, 4096);
        assert_eq!(config.consensus.supported_tx_versions, vec![TX_VERSION]);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn empty_version_list_is_rejected() {
        let err =
            ProtocolConfig::from_json_str(r#"{"consensus":{"supported_asset_versions":[]}}"#)
                .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"network":"regtest","log_format":"json"}}"#).unwrap();
        let config = ProtocolConfig::load(file.path()).unwrap();
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProtocolConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn hrp_lookup_roundtrips() {
        for network in [Network::Mainnet, Network::Testnet, Network::Regtest] {
            assert_eq!(Network::from_hrp(network.hrp()), Some(network));
        }
        assert_eq!(Network::from_hrp("bc"), None);
    }
}
