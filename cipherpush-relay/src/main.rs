//! CipherPush Relay Server
//!
//! Accepts plaintext notifications, encrypts them separately for every
//! registered device with that device's own key, and forwards the
//! ciphertext to the upstream push-delivery service.

mod config;
mod error;
mod handlers;
mod server;

use cipherpush_core::{CredentialStore, HttpPushGateway, MemoryStore, PushGateway, SqliteStore};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cipherpush-relay", about = "Per-device encrypting push relay")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut cfg = if cli.config.exists() {
        config::RelayConfig::load(&cli.config)?
    } else {
        tracing::info!("No config file found, using defaults");
        config::RelayConfig::default()
    };

    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }
    if let Some(database) = cli.database {
        cfg.storage_path = database;
    }
    cfg.core.validate()?;

    let store: Arc<dyn CredentialStore> = if cfg.in_memory() {
        tracing::warn!("No storage path configured, devices and logs are kept in memory");
        Arc::new(MemoryStore::new())
    } else {
        tracing::info!("Opening store at {}", cfg.storage_path.display());
        Arc::new(SqliteStore::open(&cfg.storage_path)?)
    };

    let gateway: Arc<dyn PushGateway> = Arc::new(HttpPushGateway::new(&cfg.core.upstream)?);
    tracing::info!("Forwarding to upstream at {}", cfg.core.upstream.base_url);

    let state = server::AppState::new(Arc::clone(&store), Some(gateway), &cfg);
    let app = server::build_router(state, &cfg);

    tracing::info!("Starting CipherPush relay on {}", cfg.listen_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    store.close()?;
    tracing::info!("Relay stopped");
    Ok(())
}
