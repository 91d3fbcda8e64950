//! Configuration management for CredChain

use crate::crypto::{checksum, parse_address, signer_from_hex, Address, LocalWallet};
use ethers::signers::Signer;
use crate::error::{CredError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "credchain.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Json,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            data_dir: default_data_dir(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Empty disables every contract-backed endpoint.
    #[serde(default = "default_contract_address")]
    pub contract_address: String,
    /// 0 asks the node for an estimate and adds a 20% buffer.
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// 0 uses `eth_gasPrice`.
    #[serde(default = "default_gas_price_gwei")]
    pub gas_price_gwei: u64,
    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,
    #[serde(default = "default_receipt_poll")]
    pub receipt_poll_millis: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            chain_id: default_chain_id(),
            contract_address: default_contract_address(),
            gas_limit: default_gas_limit(),
            gas_price_gwei: default_gas_price_gwei(),
            receipt_timeout_secs: default_receipt_timeout(),
            receipt_poll_millis: default_receipt_poll(),
        }
    }
}

impl ChainConfig {
    pub fn contract(&self) -> Result<Option<Address>> {
        let trimmed = self.contract_address.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        parse_address(trimmed)
            .map(Some)
            .map_err(|e| CredError::ConfigError(format!("chain.contract_address: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            user_agent: default_user_agent(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerificationConfig {
    /// Seconds between background sweeps of pending projects; 0 disables the worker.
    #[serde(default)]
    pub interval_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:5000".to_string(),
        "http://127.0.0.1:5000".to_string(),
    ]
}

fn default_backend() -> StorageBackend {
    StorageBackend::Json
}

fn default_data_dir() -> String {
    ".".to_string()
}

fn default_sqlite_path() -> String {
    "credchain.db".to_string()
}

fn default_rpc_url() -> String {
    "https://rpc.api.moonbase.moonbeam.network".to_string()
}

fn default_chain_id() -> u64 {
    1287
}

fn default_contract_address() -> String {
    "0xCCc0F45E8bE87022ea3E553BdD2f64cD6aAeed79".to_string()
}

fn default_gas_limit() -> u64 {
    7_000_000
}

fn default_gas_price_gwei() -> u64 {
    20
}

fn default_receipt_timeout() -> u64 {
    120
}

fn default_receipt_poll() -> u64 {
    1000
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    "CredChainVerifier/1.0".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Config {
    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(config_str).map_err(|e| CredError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chain.rpc_url.trim().is_empty() {
            return Err(CredError::ConfigError("chain.rpc_url must be set".into()));
        }
        if self.chain.chain_id == 0 {
            return Err(CredError::ConfigError("chain.chain_id must be non-zero".into()));
        }
        if self.chain.receipt_poll_millis == 0 {
            return Err(CredError::ConfigError(
                "chain.receipt_poll_millis must be non-zero".into(),
            ));
        }
        if self.chain.receipt_timeout_secs == 0 {
            return Err(CredError::ConfigError(
                "chain.receipt_timeout_secs must be non-zero".into(),
            ));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(CredError::ConfigError(
                "fetch.timeout_secs must be non-zero".into(),
            ));
        }
        if self.storage.backend == StorageBackend::Json && self.storage.data_dir.is_empty() {
            return Err(CredError::ConfigError("storage.data_dir must be set".into()));
        }
        self.chain.contract()?;
        Ok(())
    }
}

/// Load `credchain.toml` (or the file named by `CREDCHAIN_CONFIG`), falling back
/// to defaults when the file is absent. `PORT` overrides `server.port`.
pub fn load_config() -> Result<Config> {
    let path = std::env::var("CREDCHAIN_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut config = load_config_from(Path::new(&path))?;

    if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
        config.server.port = port;
    }

    Ok(config)
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let config_str = fs::read_to_string(path)?;
    Config::from_toml(&config_str)
}

/// Read the backend signer from `CREDCHAIN_SIGNER_KEY` (or `SECRETKEY`).
///
/// When `METAMASK` is also set it must name the same account.
pub fn signer_from_env() -> Result<Option<LocalWallet>> {
    let secret = std::env::var("CREDCHAIN_SIGNER_KEY")
        .or_else(|_| std::env::var("SECRETKEY"))
        .ok()
        .filter(|s| !s.trim().is_empty());

    let Some(secret) = secret else {
        return Ok(None);
    };

    let wallet = signer_from_hex(&secret)?;

    if let Ok(expected) = std::env::var("METAMASK") {
        if !expected.trim().is_empty() {
            let expected = parse_address(&expected)?;
            if expected != wallet.address() {
                return Err(CredError::ConfigError(format!(
                    "METAMASK {} does not match signer address {}",
                    checksum(&expected),
                    checksum(&wallet.address())
                )));
            }
        }
    }

    Ok(Some(wallet))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_missing() {
        let config = load_config_from(Path::new("/nonexistent/credchain.toml")).unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.chain.chain_id, 1287);
        assert_eq!(config.chain.gas_limit, 7_000_000);
        assert_eq!(config.fetch.user_agent, "CredChainVerifier/1.0");
        assert_eq!(config.storage.backend, StorageBackend::Json);
        assert!(config.chain.contract().unwrap().is_some());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 8081

            [storage]
            backend = "sqlite"
            sqlite_path = "/tmp/cc.db"

            [chain]
            contract_address = ""
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.chain.rpc_url, default_rpc_url());
        assert!(config.chain.contract().unwrap().is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::from_toml("[chain]\nchain_id = 0\n").is_err());
        assert!(Config::from_toml("[chain]\ncontract_address = \"0x1234\"\n").is_err());
        assert!(Config::from_toml("[fetch]\ntimeout_secs = 0\n").is_err());
        assert!(Config::from_toml("[chain]\nreceipt_timeout_secs = 0\n").is_err());
        assert!(Config::from_toml("[storage]\nbackend = \"mongo\"\n").is_err());
    }

    #[test]
    fn test_rejects_zero_receipt_poll() {
        let err = Config::from_toml("[chain]\nreceipt_poll_millis = 0\n").unwrap_err();
        assert!(err.to_string().contains("receipt_poll_millis"));
        assert!(Config::from_toml("[chain]\nreceipt_poll_millis = 250\n").is_ok());
    }
}
