//! Process bootstrap: wire config, storage, fetcher, and contract into a running server

use crate::api::{build_api_router, AppState};
use crate::config::{signer_from_env, Config};
use crate::content::{ContentFetcher, HttpFetcher};
use crate::contract::{self, CredChainContract};
use crate::error::{CredError, Result};
use crate::persistence::open_store;
use crate::verification::{Pipeline, VerificationWorker};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "credchain=info,tower_http=info";

/// Install the global tracing subscriber. `RUST_LOG` wins over the default filter.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // a second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Build the pipeline described by `config`, reading the signer key from the environment.
pub fn build_pipeline(config: &Config) -> Result<Arc<Pipeline>> {
    let store = open_store(&config.storage)?;
    let fetcher: Arc<dyn ContentFetcher> = Arc::new(HttpFetcher::new(&config.fetch)?);

    let signer = signer_from_env()?;
    let contract = contract::connect(&config.chain, signer)?
        .map(|c| Arc::new(c) as Arc<dyn CredChainContract>);
    if contract.is_none() {
        tracing::warn!("No contract address configured; on-chain endpoints are disabled");
    }

    Ok(Arc::new(Pipeline::new(store, fetcher, contract)))
}

/// Run the HTTP server until Ctrl-C.
pub async fn run(config: Config) -> Result<()> {
    let pipeline = build_pipeline(&config)?;

    let mut state = AppState::new(pipeline.clone())
        .with_allowed_origins(config.server.allowed_origins.clone());

    let worker = if config.verification.interval_secs > 0 {
        let worker = Arc::new(VerificationWorker::new(
            pipeline.clone(),
            Duration::from_secs(config.verification.interval_secs),
        ));
        worker.start().await?;
        state = state.with_worker(worker.clone());
        Some(worker)
    } else {
        None
    };

    let app = build_api_router(Arc::new(state));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| CredError::ConfigError(format!("Invalid listen address: {}", e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "server.listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(worker) = worker {
        if worker.is_running() {
            worker.stop().await?;
        }
    }
    tracing::info!("server.stopped");
    Ok(())
}

/// Resolves on Ctrl-C. If the handler cannot be installed the server keeps running.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for shutdown signal; running until killed");
            std::future::pending::<()>().await
        }
    }
}
