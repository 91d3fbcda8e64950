//! Pending verifications survive a restart on the durable backends.

mod common;

use common::{FakeChain, StaticFetcher, BUILDER, CLIENT};
use credchain::config::{StorageBackend, StorageConfig};
use credchain::contract::CredChainContract;
use credchain::persistence::{open_store, JsonFileStore, Persistence, SqliteStore, PENDING_FILE};
use credchain::verification::{PendingStatus, Pipeline, ProjectSubmission, VerifyOutcome};
use std::sync::Arc;
use tempfile::TempDir;

const LINK: &str = "https://github.com/ada/indexer/blob/main/README.md";
const RAW: &str = "https://raw.githubusercontent.com/ada/indexer/main/README.md";

fn submission() -> ProjectSubmission {
    ProjectSubmission {
        wallet: BUILDER.to_string(),
        client: CLIENT.to_string(),
        project_name: "Indexer".to_string(),
        description: String::new(),
        languages: "Rust".to_string(),
        link: LINK.to_string(),
    }
}

fn pipeline(
    store: Arc<dyn Persistence>,
    fetcher: &Arc<StaticFetcher>,
    chain: &Arc<FakeChain>,
) -> Pipeline {
    let contract: Arc<dyn CredChainContract> = chain.clone();
    Pipeline::new(store, fetcher.clone(), Some(contract))
}

/// Submit with one store instance, then verify through a freshly opened one.
async fn survives_restart(open: impl Fn() -> Arc<dyn Persistence>) {
    let fetcher = Arc::new(StaticFetcher::default());
    let chain = Arc::new(FakeChain::default());
    fetcher.serve(RAW, 200, "# Indexer");

    let submitted = pipeline(open(), &fetcher, &chain)
        .submit_project(submission())
        .await
        .expect("submit");
    let index = submitted.index.expect("index resolved");

    fetcher.serve(RAW, 404, "");
    let restarted = pipeline(open(), &fetcher, &chain);
    let outcome = restarted.verify_project(BUILDER, index).await.unwrap();
    assert!(matches!(outcome, VerifyOutcome::Unreachable { .. }));

    let record = open().get_pending(BUILDER, index).unwrap().unwrap();
    assert_eq!(record.status, PendingStatus::Unreachable);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.tx_hash, submitted.tx_hash);

    fetcher.serve(RAW, 200, "# Indexer");
    let summary = pipeline(open(), &fetcher, &chain)
        .verify_all_pending()
        .await
        .unwrap();
    assert_eq!(summary.verified, 1);
    assert!(open().load_pending().unwrap().is_empty());
    assert!(open().load_builders().unwrap().contains(BUILDER));
}

#[tokio::test]
async fn test_json_store_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();
    survives_restart(|| {
        Arc::new(JsonFileStore::open(&path).unwrap()) as Arc<dyn Persistence>
    })
    .await;

    // the queue file is left as an empty JSON array
    let raw = std::fs::read_to_string(dir.path().join(PENDING_FILE)).unwrap();
    assert_eq!(raw.trim(), "[]");
}

#[tokio::test]
async fn test_sqlite_store_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("credchain.db");
    let path = path.to_str().unwrap().to_string();
    survives_restart(|| {
        Arc::new(SqliteStore::open(&path).unwrap()) as Arc<dyn Persistence>
    })
    .await;
}

#[tokio::test]
async fn test_unindexed_submission_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("credchain.db");
    let path = path.to_str().unwrap().to_string();
    let open = || Arc::new(SqliteStore::open(&path).unwrap()) as Arc<dyn Persistence>;

    let fetcher = Arc::new(StaticFetcher::default());
    let chain = Arc::new(FakeChain::default());
    fetcher.serve(RAW, 200, "# Indexer");
    chain
        .drop_read_after_write
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let submitted = pipeline(open(), &fetcher, &chain)
        .submit_project(submission())
        .await
        .expect("a confirmed write is not reported as a failure");
    assert_eq!(submitted.index, None);

    let queued = open().load_pending().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].index, None);
    assert_eq!(queued[0].tx_hash, submitted.tx_hash);

    let summary = pipeline(open(), &fetcher, &chain)
        .verify_all_pending()
        .await
        .unwrap();
    assert_eq!(summary.verified, 1);
    assert!(open().load_pending().unwrap().is_empty());
    assert!(chain.projects.lock().values().flatten().all(|p| p.verified));
}

#[tokio::test]
async fn test_open_store_picks_backend() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig {
        backend: StorageBackend::Json,
        data_dir: dir.path().to_str().unwrap().to_string(),
        sqlite_path: String::new(),
    };
    let store = open_store(&config).unwrap();
    assert!(store.add_builder("0xabc").unwrap());
    assert!(dir.path().join("builders.json").exists());

    let config = StorageConfig {
        backend: StorageBackend::Memory,
        ..config
    };
    let store = open_store(&config).unwrap();
    assert!(store.load_builders().unwrap().is_empty());
}
