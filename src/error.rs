//! Error types for CredChain

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Fetch error: {0}")]
    FetchError(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("ABI error: {0}")]
    AbiError(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("Transaction {0} reverted")]
    Reverted(String),

    #[error("Timed out waiting for receipt of {0}")]
    ReceiptTimeout(String),

    #[error("No signer key configured for contract writes")]
    SignerUnavailable,

    #[error("Contract not loaded")]
    ContractUnavailable,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CredError {
    /// True for failures that originate on the chain side (node, contract, receipts).
    pub fn is_chain_failure(&self) -> bool {
        matches!(
            self,
            CredError::RpcError(_)
                | CredError::AbiError(_)
                | CredError::Reverted(_)
                | CredError::ReceiptTimeout(_)
        )
    }
}

impl From<serde_json::Error> for CredError {
    fn from(err: serde_json::Error) -> Self {
        CredError::StorageError(err.to_string())
    }
}

impl From<rusqlite::Error> for CredError {
    fn from(err: rusqlite::Error) -> Self {
        CredError::StorageError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, CredError>;
