//! The single write path for contract transactions

use crate::crypto::{lower_hex, Address, LocalWallet};
use crate::error::{CredError, Result};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::Signer;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{BlockNumber, Bytes, TransactionReceipt, TransactionRequest, U256};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;

const GWEI: u64 = 1_000_000_000;

/// Receipt fields the backend cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
    pub success: bool,
}

impl From<&TransactionReceipt> for TxReceipt {
    fn from(receipt: &TransactionReceipt) -> Self {
        TxReceipt {
            transaction_hash: format!("0x{}", hex::encode(receipt.transaction_hash.as_bytes())),
            block_number: receipt.block_number.map(|n| n.as_u64()).unwrap_or(0),
            gas_used: receipt.gas_used.map(|g| g.low_u64()).unwrap_or(0),
            // pre-Byzantium receipts carry no status; treat them as successful
            success: receipt.status.map(|s| s.as_u64() == 1).unwrap_or(true),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SenderSettings {
    pub chain_id: u64,
    /// 0 means estimate.
    pub gas_limit: u64,
    /// 0 means ask the node.
    pub gas_price_gwei: u64,
    pub receipt_timeout: Duration,
    pub receipt_poll: Duration,
}

/// Runs every contract write: nonce fetch, build, sign, broadcast, wait for receipt.
///
/// Sends are serialized so two in-flight writes never observe the same pending nonce.
pub struct TransactionSender {
    client: SignerMiddleware<Provider<Http>, LocalWallet>,
    settings: SenderSettings,
    lock: Mutex<()>,
}

fn rpc_error(step: &str, err: impl std::fmt::Display) -> CredError {
    CredError::RpcError(format!("{}: {}", step, err))
}

impl TransactionSender {
    pub fn new(provider: Provider<Http>, wallet: LocalWallet, settings: SenderSettings) -> Self {
        let wallet = wallet.with_chain_id(settings.chain_id);
        Self {
            client: SignerMiddleware::new(provider, wallet),
            settings,
            lock: Mutex::new(()),
        }
    }

    pub fn from_address(&self) -> Address {
        self.client.address()
    }

    pub async fn send(&self, to: Address, data: Bytes) -> Result<TxReceipt> {
        let _guard = self.lock.lock().await;
        let from = self.client.address();

        let nonce = self
            .client
            .get_transaction_count(from, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| rpc_error("eth_getTransactionCount", e))?;

        let mut tx: TypedTransaction = TransactionRequest::new()
            .from(from)
            .to(to)
            .value(U256::zero())
            .data(data)
            .nonce(nonce)
            .chain_id(self.settings.chain_id)
            .into();

        let gas_price = match self.settings.gas_price_gwei {
            0 => self
                .client
                .get_gas_price()
                .await
                .map_err(|e| rpc_error("eth_gasPrice", e))?,
            gwei => U256::from(gwei) * U256::from(GWEI),
        };
        tx.set_gas_price(gas_price);

        let gas_limit = match self.settings.gas_limit {
            0 => {
                let estimate = self
                    .client
                    .estimate_gas(&tx, None)
                    .await
                    .map_err(|e| rpc_error("eth_estimateGas", e))?;
                estimate + estimate / 5
            }
            fixed => U256::from(fixed),
        };
        tx.set_gas(gas_limit);

        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| rpc_error("eth_sendRawTransaction", e))?;
        let tx_hash = format!("0x{}", hex::encode(pending.tx_hash().as_bytes()));
        tracing::info!(
            tx_hash = %tx_hash,
            nonce = %nonce,
            gas_limit = %gas_limit,
            gas_price = %gas_price,
            to = %lower_hex(&to),
            "chain.tx_sent"
        );

        let pending = pending
            .interval(self.settings.receipt_poll)
            .confirmations(1);
        let receipt = match tokio::time::timeout(self.settings.receipt_timeout, pending).await {
            Err(_) => return Err(CredError::ReceiptTimeout(tx_hash)),
            Ok(Err(e)) => return Err(rpc_error("eth_getTransactionReceipt", e)),
            Ok(Ok(None)) => {
                return Err(CredError::RpcError(format!(
                    "{} was dropped from the mempool",
                    tx_hash
                )))
            }
            Ok(Ok(Some(receipt))) => TxReceipt::from(&receipt),
        };

        if !receipt.success {
            tracing::warn!(tx_hash = %tx_hash, "chain.tx_reverted");
            return Err(CredError::Reverted(tx_hash));
        }

        tracing::info!(
            tx_hash = %tx_hash,
            block = receipt.block_number,
            gas_used = receipt.gas_used,
            "chain.tx_confirmed"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{H256, U64};

    #[test]
    fn test_receipt_conversion() {
        let receipt = TransactionReceipt {
            transaction_hash: H256::repeat_byte(0xab),
            block_number: Some(U64::from(16)),
            gas_used: Some(U256::from(21_000)),
            status: Some(U64::from(0)),
            ..Default::default()
        };
        let converted = TxReceipt::from(&receipt);
        assert_eq!(converted.transaction_hash, format!("0x{}", "ab".repeat(32)));
        assert_eq!(converted.block_number, 16);
        assert_eq!(converted.gas_used, 21_000);
        assert!(!converted.success);

        let legacy = TransactionReceipt {
            status: None,
            ..Default::default()
        };
        assert!(TxReceipt::from(&legacy).success);
    }

    #[test]
    fn test_sender_uses_configured_chain_id() {
        let provider = Provider::<Http>::try_from("http://127.0.0.1:1").unwrap();
        let wallet = crate::crypto::generate_signer();
        let address = wallet.address();
        let sender = TransactionSender::new(
            provider,
            wallet,
            SenderSettings {
                chain_id: 1287,
                gas_limit: 0,
                gas_price_gwei: 0,
                receipt_timeout: Duration::from_secs(1),
                receipt_poll: Duration::from_millis(10),
            },
        );
        assert_eq!(sender.from_address(), address);
        assert_eq!(sender.client.signer().chain_id(), 1287);
    }
}
