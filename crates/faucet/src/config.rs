//! Faucet configuration

use crate::error::{FaucetError, FaucetResult};
use drip_common::utils::config::load_layered_config;
use drip_common::utils::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment overrides, e.g. `FAUCET__ETHEREUM__PRIVATE_KEY`.
pub const ENV_PREFIX: &str = "FAUCET";

/// Faucet service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaucetConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub faucet: LimitsConfig,

    #[serde(default)]
    pub ethereum: EthereumConfig,

    #[serde(default)]
    pub db: DbConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_host")]
    pub host: String,

    /// CORS allowed origins; `*` allows any
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Grace period for in-flight requests on shutdown (seconds)
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            allowed_origins: default_allowed_origins(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Daily caps and the per-request disbursement, in whole tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum amount disbursed across all addresses per 24h window
    #[serde(default = "default_total_transfer_limit")]
    pub total_transfer_limit: u64,

    /// Maximum amount disbursed to one address per 24h window
    #[serde(default = "default_address_transfer_limit")]
    pub address_transfer_limit: u64,

    /// Amount sent per successful request
    #[serde(default = "default_transfer_amount")]
    pub transfer_amount: u64,

    /// Ceiling on the whole transfer phase (seconds)
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            total_transfer_limit: default_total_transfer_limit(),
            address_transfer_limit: default_address_transfer_limit(),
            transfer_amount: default_transfer_amount(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
        }
    }
}

/// Chain endpoint and signing configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct EthereumConfig {
    /// JSON-RPC endpoint
    #[serde(default = "default_api_host")]
    pub api_host: String,

    /// Hex-encoded secp256k1 key of the faucet account
    #[serde(default)]
    pub private_key: String,

    /// Network chain id; fetched with `eth_chainId` when unset
    #[serde(default)]
    pub chain_id: Option<u64>,

    /// Added on top of twice the base fee to form the max fee per gas (wei)
    #[serde(default = "default_fee_cap_premium_wei")]
    pub fee_cap_premium_wei: u64,

    /// Safety margin applied to gas estimates (percent)
    #[serde(default = "default_gas_margin_percent")]
    pub gas_margin_percent: u64,

    /// Gas limit used on networks without a fee market
    #[serde(default = "default_legacy_gas_limit")]
    pub legacy_gas_limit: u64,
}

impl Default for EthereumConfig {
    fn default() -> Self {
        Self {
            api_host: default_api_host(),
            private_key: String::new(),
            chain_id: None,
            fee_cap_premium_wei: default_fee_cap_premium_wei(),
            gas_margin_percent: default_gas_margin_percent(),
            legacy_gas_limit: default_legacy_gas_limit(),
        }
    }
}

impl std::fmt::Debug for EthereumConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthereumConfig")
            .field("api_host", &self.api_host)
            .field("private_key", &"<redacted>")
            .field("chain_id", &self.chain_id)
            .field("fee_cap_premium_wei", &self.fee_cap_premium_wei)
            .field("gas_margin_percent", &self.gas_margin_percent)
            .field("legacy_gas_limit", &self.legacy_gas_limit)
            .finish()
    }
}

/// Ledger storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_host() -> String { "0.0.0.0:8000".to_string() }
fn default_allowed_origins() -> Vec<String> { vec!["*".to_string()] }
fn default_shutdown_timeout_secs() -> u64 { 20 }
fn default_total_transfer_limit() -> u64 { 10_000 }
fn default_address_transfer_limit() -> u64 { 20 }
fn default_transfer_amount() -> u64 { 10 }
fn default_transfer_timeout_secs() -> u64 { 20 }
fn default_api_host() -> String { "http://localhost:8545".to_string() }
fn default_fee_cap_premium_wei() -> u64 { 1_500_000_000 } // 1.5 Gwei
fn default_gas_margin_percent() -> u64 { 20 }
fn default_legacy_gas_limit() -> u64 { 21_000 }
fn default_db_path() -> String { "./_db_data".to_string() }

impl FaucetConfig {
    /// Loads the optional config file overlaid with `FAUCET__*` environment
    /// variables.
    pub fn load(path: Option<&Path>) -> FaucetResult<Self> {
        load_layered_config(path, Some(ENV_PREFIX))
            .map_err(|e| FaucetError::Config(format!("{:#}", e)))
    }

    pub fn validate(&self) -> FaucetResult<()> {
        if self.faucet.transfer_amount == 0 {
            return Err(FaucetError::Config("transfer_amount must be positive".to_string()));
        }
        if self.faucet.address_transfer_limit == 0 || self.faucet.total_transfer_limit == 0 {
            return Err(FaucetError::Config("transfer limits must be positive".to_string()));
        }
        if self.faucet.transfer_timeout_secs == 0 {
            return Err(FaucetError::Config("transfer_timeout_secs must be positive".to_string()));
        }
        if self.ethereum.private_key.trim().is_empty() {
            return Err(FaucetError::Config("ethereum.private_key is required".to_string()));
        }
        if self.ethereum.legacy_gas_limit == 0 {
            return Err(FaucetError::Config("legacy_gas_limit must be positive".to_string()));
        }
        Ok(())
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.faucet.transfer_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> FaucetConfig {
        let mut config = FaucetConfig::default();
        config.ethereum.private_key = "01".repeat(32);
        config
    }

    #[test]
    fn test_defaults() {
        let config = FaucetConfig::default();
        assert_eq!(config.server.host, "0.0.0.0:8000");
        assert_eq!(config.faucet.total_transfer_limit, 10_000);
        assert_eq!(config.faucet.address_transfer_limit, 20);
        assert_eq!(config.faucet.transfer_amount, 10);
        assert_eq!(config.transfer_timeout(), Duration::from_secs(20));
        assert_eq!(config.ethereum.fee_cap_premium_wei, 1_500_000_000);
        assert_eq!(config.ethereum.gas_margin_percent, 20);
        assert_eq!(config.db.path, "./_db_data");
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        // missing key
        assert!(matches!(
            FaucetConfig::default().validate(),
            Err(FaucetError::Config(_))
        ));

        let mut config = valid();
        config.faucet.transfer_amount = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.faucet.address_transfer_limit = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.faucet.transfer_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("faucet.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[faucet]\naddress_transfer_limit = 30\n\n[ethereum]\nchain_id = 314159"
        )
        .unwrap();

        let config = FaucetConfig::load(Some(&path)).unwrap();
        assert_eq!(config.faucet.address_transfer_limit, 30);
        assert_eq!(config.faucet.transfer_amount, 10);
        assert_eq!(config.ethereum.chain_id, Some(314159));
        assert_eq!(config.server.host, "0.0.0.0:8000");
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let config = valid();
        let debug = format!("{:?}", config);
        assert!(!debug.contains(&"01".repeat(32)));
        assert!(debug.contains("<redacted>"));
    }
}
