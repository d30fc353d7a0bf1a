//! TOML configuration.
//!
//! ```toml
//! [rpc]
//! address = "http://localhost:26657"
//!
//! [tx]
//! gas_limit = 200000
//! fee_denom = "uakt"
//! fee_amount = 5000
//! memo = ""
//!
//! [[signers]]
//! address = "akt1..."
//! key = "9f3c..."  # hex-encoded key material, opaque to the engine
//! ```

use crate::accounts::{AccountError, SignerAccount, SignerKey};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "./blockstress.toml";

/// All configuration parameters of a stress run.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rpc: RpcConfig,
    pub tx: TxConfig,
    #[serde(default)]
    pub signers: Vec<SignerConfig>,
}

/// RPC endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    pub address: String,
}

/// Common transaction parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct TxConfig {
    pub gas_limit: u64,
    pub fee_denom: String,
    pub fee_amount: u64,
    #[serde(default)]
    pub memo: String,
}

/// A signer account entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    pub address: String,
    /// Hex-encoded key material.
    pub key: String,
}

/// Errors from reading or decoding the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("empty configuration path")]
    EmptyPath,

    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to decode config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Config {
    /// Read and parse the configuration file at `path`.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath);
        }
        debug!(path = %path.display(), "reading config file");
        let data = std::fs::read_to_string(path)?;
        Self::parse(&data)
    }

    /// Parse configuration from TOML text.
    pub fn parse(data: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(data)?)
    }

    /// Decode the configured signers into accounts for the dispenser.
    pub fn signer_accounts(&self) -> Result<Vec<SignerAccount>, AccountError> {
        self.signers
            .iter()
            .map(|s| Ok(SignerAccount::new(&s.address, SignerKey::from_hex(&s.key)?)))
            .collect()
    }
}
