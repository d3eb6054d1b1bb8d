//! `latchkey-token` command line: signing key rotation and JWKS inspection.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use latchkey_common::init_tracing;
use latchkey_token::keys::{get_key_provider, KvStore, RedisKvStore};
use latchkey_token::rotate::{self, RESTART_NOTICE, ROTATION_WARNING};
use latchkey_token::{Config, KeysStorage, TokenService};
use std::io;
use std::sync::Arc;
use tracing::info;

/// Signing key management for the latchkey identity provider.
#[derive(Parser)]
#[command(name = "latchkey-token", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generates a new token signing key and replaces the current one
    KeyRotate {
        /// Key algorithm. Supported values: RS256, RS384, RS512, ES256, ES384, ES512, EdDSA
        #[arg(short, long, default_value = "RS256")]
        alg: String,
        /// Curve name when using EdDSA keys. Supported values: Ed25519
        #[arg(short, long, default_value = "")]
        crv: String,
        /// Do not prompt for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Loads (or creates) the signing key and prints the public JWKS
    Jwks,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(&config.tracing);

    match cli.command {
        Command::KeyRotate { alg, crv, yes } => key_rotate(&config, &alg, &crv, yes).await,
        Command::Jwks => print_jwks(&config).await,
    }
}

async fn connect_store(config: &Config) -> Result<Option<Arc<dyn KvStore>>> {
    if config.keys.storage != KeysStorage::Database {
        return Ok(None);
    }
    let store = RedisKvStore::connect_with_retry(&config.kv_url)
        .await
        .context("failed to connect to the key-value store")?;
    Ok(Some(Arc::new(store)))
}

async fn key_rotate(config: &Config, alg: &str, crv: &str, yes: bool) -> Result<()> {
    let (algorithm, curve) = rotate::normalize_algorithm(alg, crv)?;

    if !yes {
        println!("{ROTATION_WARNING}");
        let confirmed = rotate::confirm(io::stdin().lock(), io::stdout(), "Confirm")
            .context("failed to read confirmation")?;
        if !confirmed {
            println!("Aborted");
            return Ok(());
        }
    }

    let store = connect_store(config).await?;
    let provider = get_key_provider(&config.keys, store).context("failed to get key provider")?;
    rotate::rotate_key(provider.as_ref(), algorithm, curve)
        .await
        .context("failed to store new key")?;

    println!("Key rotated successfully");
    println!("{RESTART_NOTICE}");
    Ok(())
}

async fn print_jwks(config: &Config) -> Result<()> {
    let store = connect_store(config).await?;
    let provider = get_key_provider(&config.keys, store).context("failed to get key provider")?;
    let service = TokenService::new(config, provider.as_ref())
        .await
        .context("failed to initialize token service")?;

    info!(kid = service.key_id(), alg = %service.get_key_alg(), "Token service ready");
    println!("{}", service.get_public_jwks_as_json());
    Ok(())
}
