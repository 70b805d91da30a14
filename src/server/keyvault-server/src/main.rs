//! KeyVault Server - Main entry point.

mod config;
mod routes;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keyvault_api::KeyVault;

use crate::config::{decode_master_key, Cli};
use crate::routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let master_key = decode_master_key(&cli.master_key)?;

    tracing::info!("Starting KeyVault server...");
    tracing::info!(environment = %cli.environment, data_dir = %cli.data_dir.display(), "Configuration loaded");

    if cli.environment == "dev" {
        tracing::warn!("Development environment - DO NOT USE IN PRODUCTION");
    }

    let vault = KeyVault::open(&cli.data_dir, master_key)
        .await
        .context("failed to open vault")?;

    if cli.seed_auditor {
        vault
            .directory()
            .seed_auditor()
            .await
            .context("failed to seed auditor service")?;
    }

    let chain = vault
        .check_audit_chain()
        .await
        .context("failed to read audit log")?;
    if !chain.is_valid() {
        tracing::error!(status = ?chain, "Audit log integrity check failed");
    }

    let app = routes::router(AppState {
        environment: Arc::from(cli.environment.as_str()),
    });

    let listener = TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("failed to bind to {}", cli.bind))?;

    tracing::info!(addr = %cli.bind, "KeyVault server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("KeyVault server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
