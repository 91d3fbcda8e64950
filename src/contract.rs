//! On-chain side of CredChain
//!
//! - [`transaction`] - the single write path and the receipt type it yields
//! - [`credchain`] - the contract binding used by the pipeline

pub mod credchain;
pub mod transaction;

pub use credchain::{CredChain, CredChainContract, NewProject, ProjectRecord, ReviewRecord};
pub use transaction::{SenderSettings, TransactionSender, TxReceipt};

use crate::config::ChainConfig;
use crate::crypto::{lower_hex, signer_address, LocalWallet};
use crate::error::{CredError, Result};
use ethers::providers::{Http, Provider};
use std::time::Duration;

/// Build the contract binding described by `config`.
///
/// Returns `None` when no contract address is configured. Without a signer the
/// binding is read-only.
pub fn connect(config: &ChainConfig, signer: Option<LocalWallet>) -> Result<Option<CredChain>> {
    let Some(address) = config.contract()? else {
        return Ok(None);
    };

    let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
        .map_err(|e| CredError::ConfigError(format!("chain.rpc_url: {}", e)))?
        .interval(Duration::from_millis(config.receipt_poll_millis));

    let sender = signer.map(|wallet| {
        tracing::info!(
            signer = %signer_address(&wallet),
            contract = %lower_hex(&address),
            "chain.signer_ready"
        );
        TransactionSender::new(
            provider.clone(),
            wallet,
            SenderSettings {
                chain_id: config.chain_id,
                gas_limit: config.gas_limit,
                gas_price_gwei: config.gas_price_gwei,
                receipt_timeout: Duration::from_secs(config.receipt_timeout_secs),
                receipt_poll: Duration::from_millis(config.receipt_poll_millis),
            },
        )
    });
    if sender.is_none() {
        tracing::warn!(
            contract = %lower_hex(&address),
            "No signer key configured; contract writes are disabled"
        );
    }

    Ok(Some(CredChain::new(provider, address, sender)?))
}
