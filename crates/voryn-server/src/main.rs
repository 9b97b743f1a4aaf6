use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use voryn_xmpp::AccountRepository;

mod account_repository;
mod config;
mod server;
mod telemetry;

use account_repository::MongoAccountRepository;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init().map_err(|e| anyhow::anyhow!("failed to init telemetry: {e}"))?;

    info!("Voryn relay starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("License: AGPL-3.0");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(domain = %config.xmpp_domain, port = config.port, "configuration loaded");

    let repository: Arc<dyn AccountRepository> =
        Arc::new(MongoAccountRepository::connect(&config.mongo_uri, &config.db_name).await?);
    info!("connected to MongoDB");

    server::start(config, repository).await?;

    Ok(())
}
