//! Command line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::Parser;

use keyvault_crypto::MasterKey;

/// Server configuration. Every flag can also be set from the environment.
#[derive(Parser)]
#[command(name = "keyvault-server")]
#[command(about = "KeyVault Lite - key management with envelope encryption and a hash-chained audit log")]
#[command(version)]
pub struct Cli {
    /// Master key, base64 of exactly 32 bytes
    #[arg(long, env = "KEYVAULT_MASTER_KEY", hide_env_values = true)]
    pub master_key: String,

    /// Directory holding the database file
    #[arg(long, default_value = "data", env = "KEYVAULT_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Server bind address
    #[arg(long, default_value = "0.0.0.0:8200", env = "KEYVAULT_BIND_ADDRESS")]
    pub bind: SocketAddr,

    /// Deployment environment reported by the health endpoint
    #[arg(long, default_value = "dev", env = "ENV")]
    pub environment: String,

    /// Register the built-in auditor service if it is missing
    #[arg(long)]
    pub seed_auditor: bool,
}

/// Decodes the base64 master key.
pub fn decode_master_key(encoded: &str) -> anyhow::Result<MasterKey> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .context("KEYVAULT_MASTER_KEY is not valid base64")?;

    if bytes.len() != 32 {
        bail!("KEYVAULT_MASTER_KEY must decode to 32 bytes, got {}", bytes.len());
    }

    MasterKey::from_bytes(&bytes).context("invalid master key")
}
