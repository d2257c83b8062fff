//! Signing key administration for authd.
//!
//! Operates directly on the configured storage backend, so it must be run
//! with the same `STORAGE_BACKEND` and `DATABASE_URL` as the server.
//!
//! ```bash
//! # Show every key
//! authd-keys list
//!
//! # Activate a new key and keep the old one verifiable for a day
//! authd-keys rotate --expire-previous-after 1d
//!
//! # Retire a demoted key in one hour
//! authd-keys expire 01J9Z3K8Q2V7XW5N4M6R0T1Y2A --after 1h
//! ```
//!
//! Servers pick up a rotation once their cached key is older than
//! `SIGNING_KEY_CACHE_TTL`.

use anyhow::Result;
use authd::{
    audit::{AuditEvent, AuditLogger},
    oauth::SigningKeyManager,
    storage::{OAuthStorage, create_storage_backend, parse_storage_backend},
};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::{process, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(
    name = "authd-keys",
    about = "Signing key administration for authd",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Storage backend holding the keys
    #[arg(long, env = "STORAGE_BACKEND")]
    storage_backend: String,

    /// Connection string for SQL backends
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every key, newest first
    List,
    /// Generate and activate a new signing key
    Rotate(RotateArgs),
    /// Set the expiry of a demoted key
    Expire(ExpireArgs),
}

#[derive(Args)]
struct RotateArgs {
    /// Keep the demoted key verifiable for this long (e.g. `1d`)
    #[arg(long, value_parser = parse_duration)]
    expire_previous_after: Option<Duration>,
}

#[derive(Args)]
struct ExpireArgs {
    /// Key id (`kid`) to expire
    kid: String,

    /// Delay before the key leaves the key set
    #[arg(long, value_parser = parse_duration, default_value = "0s")]
    after: Duration,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    duration_str::parse(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "authd=info,warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let backend = parse_storage_backend(&cli.storage_backend, cli.database_url.as_deref())?;
    let storage = create_storage_backend(backend).await?;

    match cli.command {
        Commands::List => list_keys(storage.as_ref()).await,
        Commands::Rotate(args) => rotate_key(storage, args).await,
        Commands::Expire(args) => expire_key(storage, args).await,
    }
}

async fn list_keys(storage: &dyn OAuthStorage) -> Result<()> {
    let keys = storage.list_signing_keys().await?;
    if keys.is_empty() {
        println!("No signing keys");
        return Ok(());
    }

    let now = Utc::now();
    println!(
        "{:<28} {:<8} {:<12} {:<26} EXPIRES",
        "KID", "ACTIVE", "VERIFIABLE", "CREATED"
    );
    for key in keys {
        println!(
            "{:<28} {:<8} {:<12} {:<26} {}",
            key.key_id,
            key.is_active,
            key.is_verifiable(now),
            key.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            key.expires_at
                .map(|expires_at| expires_at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

async fn rotate_key(storage: Arc<dyn OAuthStorage>, args: RotateArgs) -> Result<()> {
    let manager = SigningKeyManager::new(storage, Duration::ZERO);
    let rotation = manager.rotate_key().await?;

    let (audit, audit_writer) = AuditLogger::new(4);
    let token = CancellationToken::new();
    let writer = tokio::spawn(audit_writer.run(token.clone()));
    audit.record(AuditEvent::SigningKeyRotated {
        key_id: rotation.key_id.clone(),
        previous_key_id: rotation.previous_key_id.clone(),
    });
    token.cancel();
    writer.await?;

    println!("Activated {}", rotation.key_id);

    match (rotation.previous_key_id, args.expire_previous_after) {
        (Some(previous), Some(after)) => {
            let expires_at = expiry_after(after)?;
            manager.expire_key(&previous, expires_at).await?;
            println!("Demoted {previous}, expires {}", expires_at.to_rfc3339());
        }
        (Some(previous), None) => {
            println!("Demoted {previous}, no expiry set");
        }
        (None, _) => {}
    }
    Ok(())
}

async fn expire_key(storage: Arc<dyn OAuthStorage>, args: ExpireArgs) -> Result<()> {
    let manager = SigningKeyManager::new(storage, Duration::ZERO);
    let expires_at = expiry_after(args.after)?;
    manager.expire_key(&args.kid, expires_at).await?;
    println!("{} expires {}", args.kid, expires_at.to_rfc3339());
    Ok(())
}

fn expiry_after(after: Duration) -> Result<DateTime<Utc>> {
    Ok(Utc::now() + chrono::Duration::from_std(after)?)
}
