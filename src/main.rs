//! entry-store: a tiny network-accessible entry collection
//!
//! Clients append batches of `{item, completed}` records and fetch the whole
//! collection over a minimal HTTP/1.1-shaped protocol:
//! - `GET /data` returns every entry as JSON
//! - `POST /data` appends a JSON list of entries, assigning ids
//!
//! The collection is persisted as a single pretty-printed JSON file.
//! Configuration via CLI arguments or TOML file.

mod config;
mod handler;
mod protocol;
mod server;
mod storage;

use config::Config;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        data_file = %config.data_file.display(),
        max_connections = ?config.max_connections,
        "Starting entry-store server"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let server = Server::bind(&config).await?;
        server.run().await
    })
}
