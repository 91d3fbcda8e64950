//! Contract binding and write path against a local JSON-RPC node
//!
//! The node is a small axum app on a loopback port that answers the handful of
//! `eth_*` methods the backend uses and records every call it sees.

use axum::{extract::State, routing::post, Json, Router};
use credchain::contract::{
    CredChain, CredChainContract, NewProject, ProjectRecord, SenderSettings, TransactionSender,
};
use credchain::crypto::{parse_address, signer_from_hex, Address, LocalWallet};
use credchain::error::CredError;
use ethers::abi::{encode, Token};
use ethers::providers::{Http, Provider};
use ethers::types::{Bytes, Transaction};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const CONTRACT: &str = "0x3333333333333333333333333333333333333333";
const BUILDER: &str = "0x1111111111111111111111111111111111111111";
const CHAIN_ID: u64 = 1287;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiptMode {
    Success,
    Reverted,
    /// The transaction is mined but its receipt never shows up.
    Missing,
    /// The node forgets the transaction right after accepting it.
    Dropped,
}

struct Node {
    mode: ReceiptMode,
    calls: Mutex<Vec<String>>,
    raw_txs: Mutex<Vec<String>>,
    call_output: Mutex<String>,
}

impl Node {
    fn methods(&self) -> Vec<String> {
        let mut methods = self.calls.lock().clone();
        methods.dedup();
        methods
    }
}

fn tx_hash(n: usize) -> String {
    format!("0x{:064x}", n + 0xa000)
}

fn transaction(hash: &Value) -> Value {
    json!({
        "hash": hash,
        "nonce": "0x0",
        "blockHash": format!("0x{}", "11".repeat(32)),
        "blockNumber": "0x10",
        "transactionIndex": "0x0",
        "from": format!("0x{}", "00".repeat(20)),
        "to": CONTRACT,
        "value": "0x0",
        "gasPrice": "0x3b9aca00",
        "gas": "0x186a0",
        "input": "0x",
        "v": "0x1b",
        "r": "0x1",
        "s": "0x1",
    })
}

fn receipt(hash: &Value, status: &str) -> Value {
    json!({
        "transactionHash": hash,
        "transactionIndex": "0x0",
        "blockHash": format!("0x{}", "11".repeat(32)),
        "blockNumber": "0x10",
        "from": format!("0x{}", "00".repeat(20)),
        "to": CONTRACT,
        "cumulativeGasUsed": "0x1d4c0",
        "gasUsed": "0x1d4c0",
        "contractAddress": null,
        "logs": [],
        "status": status,
        "logsBloom": format!("0x{}", "00".repeat(256)),
        "type": "0x0",
        "effectiveGasPrice": "0x3b9aca00",
    })
}

async fn rpc(State(node): State<Arc<Node>>, Json(req): Json<Value>) -> Json<Value> {
    let method = req["method"].as_str().unwrap_or_default().to_string();
    node.calls.lock().push(method.clone());
    let param = &req["params"][0];

    let result = match method.as_str() {
        "eth_getTransactionCount" => json!(format!("{:#x}", node.raw_txs.lock().len())),
        "eth_gasPrice" => json!("0x3b9aca00"),
        "eth_estimateGas" => json!("0x186a0"),
        "eth_sendRawTransaction" => {
            let mut raw = node.raw_txs.lock();
            raw.push(param.as_str().unwrap_or_default().to_string());
            json!(tx_hash(raw.len() - 1))
        }
        "eth_getTransactionByHash" => match node.mode {
            ReceiptMode::Dropped => Value::Null,
            _ => transaction(param),
        },
        "eth_getTransactionReceipt" => match node.mode {
            ReceiptMode::Success => receipt(param, "0x1"),
            ReceiptMode::Reverted => receipt(param, "0x0"),
            ReceiptMode::Missing | ReceiptMode::Dropped => Value::Null,
        },
        "eth_call" => json!(node.call_output.lock().clone()),
        other => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": { "code": -32601, "message": format!("{} not supported", other) },
            }))
        }
    };
    Json(json!({ "jsonrpc": "2.0", "id": req["id"], "result": result }))
}

async fn spawn_node(mode: ReceiptMode) -> (Arc<Node>, String) {
    let node = Arc::new(Node {
        mode,
        calls: Mutex::new(Vec::new()),
        raw_txs: Mutex::new(Vec::new()),
        call_output: Mutex::new("0x".to_string()),
    });
    let app = Router::new().route("/", post(rpc)).with_state(node.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (node, url)
}

fn provider(url: &str) -> Provider<Http> {
    Provider::<Http>::try_from(url)
        .unwrap()
        .interval(Duration::from_millis(20))
}

fn wallet() -> LocalWallet {
    signer_from_hex(SECRET).unwrap()
}

fn sender(url: &str, receipt_timeout: Duration) -> TransactionSender {
    TransactionSender::new(
        provider(url),
        wallet(),
        SenderSettings {
            chain_id: CHAIN_ID,
            gas_limit: 0,
            gas_price_gwei: 0,
            receipt_timeout,
            receipt_poll: Duration::from_millis(20),
        },
    )
}

fn contract() -> Address {
    parse_address(CONTRACT).unwrap()
}

fn decode_raw(raw: &str) -> Transaction {
    let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap();
    ethers::utils::rlp::decode(&bytes).unwrap()
}

fn new_project() -> NewProject {
    NewProject {
        user: parse_address(BUILDER).unwrap(),
        client: Address::repeat_byte(0x22),
        project_name: "Indexer".to_string(),
        description: "Chain indexer".to_string(),
        languages: "Rust".to_string(),
        project_hash: "ab".repeat(32),
        link: "https://github.com/ada/indexer".to_string(),
    }
}

#[tokio::test]
async fn test_write_path_runs_every_step() {
    let (node, url) = spawn_node(ReceiptMode::Success).await;
    let sender = sender(&url, Duration::from_secs(5));

    let receipt = sender
        .send(contract(), Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]))
        .await
        .unwrap();
    assert!(receipt.success);
    assert_eq!(receipt.transaction_hash, tx_hash(0));
    assert_eq!(receipt.block_number, 16);
    assert_eq!(receipt.gas_used, 120_000);

    assert_eq!(
        node.methods(),
        vec![
            "eth_getTransactionCount",
            "eth_gasPrice",
            "eth_estimateGas",
            "eth_sendRawTransaction",
            "eth_getTransactionByHash",
            "eth_getTransactionReceipt",
        ]
    );

    let raw = node.raw_txs.lock().clone();
    assert_eq!(raw.len(), 1);
    let tx = decode_raw(&raw[0]);
    assert_eq!(tx.nonce.as_u64(), 0);
    assert_eq!(tx.to, Some(contract()));
    assert_eq!(tx.input.to_vec(), vec![0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(tx.gas_price.map(|p| p.as_u64()), Some(1_000_000_000));
    // 100_000 estimated plus a fifth of headroom
    assert_eq!(tx.gas.as_u64(), 120_000);
    // EIP-155: v = chain_id * 2 + 35 + parity
    assert_eq!((tx.v.as_u64() - 35) / 2, CHAIN_ID);
}

#[tokio::test]
async fn test_configured_gas_skips_node_queries() {
    let (node, url) = spawn_node(ReceiptMode::Success).await;
    let sender = TransactionSender::new(
        provider(&url),
        wallet(),
        SenderSettings {
            chain_id: CHAIN_ID,
            gas_limit: 300_000,
            gas_price_gwei: 2,
            receipt_timeout: Duration::from_secs(5),
            receipt_poll: Duration::from_millis(20),
        },
    );

    sender.send(contract(), Bytes::new()).await.unwrap();
    let methods = node.methods();
    assert!(!methods.iter().any(|m| m == "eth_gasPrice"));
    assert!(!methods.iter().any(|m| m == "eth_estimateGas"));

    let tx = decode_raw(&node.raw_txs.lock()[0]);
    assert_eq!(tx.gas.as_u64(), 300_000);
    assert_eq!(tx.gas_price.map(|p| p.as_u64()), Some(2_000_000_000));
}

#[tokio::test]
async fn test_concurrent_sends_take_distinct_nonces() {
    let (node, url) = spawn_node(ReceiptMode::Success).await;
    let sender = Arc::new(sender(&url, Duration::from_secs(5)));

    let (a, b) = tokio::join!(
        sender.send(contract(), Bytes::from(vec![1])),
        sender.send(contract(), Bytes::from(vec![2]))
    );
    a.unwrap();
    b.unwrap();

    let mut nonces: Vec<u64> = node
        .raw_txs
        .lock()
        .iter()
        .map(|raw| decode_raw(raw).nonce.as_u64())
        .collect();
    nonces.sort();
    assert_eq!(nonces, vec![0, 1]);
}

#[tokio::test]
async fn test_status_zero_receipt_is_reverted() {
    let (_node, url) = spawn_node(ReceiptMode::Reverted).await;
    let err = sender(&url, Duration::from_secs(5))
        .send(contract(), Bytes::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CredError::Reverted(ref hash) if *hash == tx_hash(0)), "{err:?}");
}

#[tokio::test]
async fn test_missing_receipt_times_out() {
    let (node, url) = spawn_node(ReceiptMode::Missing).await;
    let err = sender(&url, Duration::from_millis(300))
        .send(contract(), Bytes::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, CredError::ReceiptTimeout(ref hash) if *hash == tx_hash(0)),
        "{err:?}"
    );
    let polls = node
        .calls
        .lock()
        .iter()
        .filter(|m| *m == "eth_getTransactionReceipt")
        .count();
    assert!(polls > 1, "receipt polled {} times", polls);
}

#[tokio::test]
async fn test_forgotten_transaction_is_an_rpc_error() {
    let (_node, url) = spawn_node(ReceiptMode::Dropped).await;
    let err = sender(&url, Duration::from_secs(5))
        .send(contract(), Bytes::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CredError::RpcError(ref msg) if msg.contains("dropped")), "{err:?}");
}

#[tokio::test]
async fn test_binding_writes_through_sender() {
    let (node, url) = spawn_node(ReceiptMode::Success).await;
    let chain = CredChain::new(
        provider(&url),
        contract(),
        Some(sender(&url, Duration::from_secs(5))),
    )
    .unwrap();
    assert!(chain.can_write());

    let receipt = chain.add_project(&new_project()).await.unwrap();
    assert_eq!(receipt.transaction_hash, tx_hash(0));

    let tx = decode_raw(&node.raw_txs.lock()[0]);
    let selector = &ethers::utils::id(
        "addProject((address,address,string,string,string,string,string))",
    );
    assert_eq!(&tx.input[..4], &selector[..]);
}

#[tokio::test]
async fn test_binding_reads_decode_node_output() {
    let (node, url) = spawn_node(ReceiptMode::Success).await;
    let chain = CredChain::new(provider(&url), contract(), None).unwrap();
    let builder = parse_address(BUILDER).unwrap();

    let record = ProjectRecord {
        client: Address::repeat_byte(0x22),
        project_name: "Indexer".to_string(),
        description: "Chain indexer".to_string(),
        languages: "Rust".to_string(),
        project_hash: "ab".repeat(32),
        link: "https://github.com/ada/indexer".to_string(),
        verified: true,
        timestamp: 1_760_000_000,
    };
    *node.call_output.lock() = format!(
        "0x{}",
        hex::encode(encode(&[Token::Array(vec![record.to_token()])]))
    );
    assert_eq!(chain.get_all_projects(builder).await.unwrap(), vec![record]);

    *node.call_output.lock() = format!("0x{}", hex::encode(encode(&[Token::Bool(true)])));
    assert!(chain.is_verified(builder).await.unwrap());

    // an address with no code answers eth_call with empty data
    *node.call_output.lock() = "0x".to_string();
    assert!(matches!(
        chain.is_verified(builder).await,
        Err(CredError::RpcError(_))
    ));

    assert!(matches!(
        chain.set_user_verified(builder, true).await,
        Err(CredError::SignerUnavailable)
    ));
    assert!(node.raw_txs.lock().is_empty());
}
