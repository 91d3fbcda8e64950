#![forbid(unsafe_code)]
//! CredChain HTTP server

use credchain::config::load_config;
use credchain::server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    server::init_tracing();

    let config = load_config()?;
    tracing::info!(
        port = config.server.port,
        backend = ?config.storage.backend,
        rpc = %config.chain.rpc_url,
        "server.starting"
    );

    server::run(config).await?;
    Ok(())
}
