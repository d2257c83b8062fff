//! authd server binary.
//!
//! Loads configuration from the environment, connects storage and the
//! one-time token broker, and serves the OAuth 2.0 / OpenID Connect
//! endpoints until SIGINT or SIGTERM.

use anyhow::Result;
use authd::{
    config::Config,
    http::{AppState, build_router},
    oauth::{MemoryOneTimeTokenBroker, OneTimeTokenBroker},
    storage::{create_storage_backend, parse_storage_backend},
};
use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "authd=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();

    let version = authd::config::version()?;

    env::args().for_each(|arg| {
        if arg == "--version" {
            println!("{version}");
            std::process::exit(0);
        }
    });

    tracing::info!(?version, "Starting authd");

    let config = Arc::new(Config::new()?);

    let backend = parse_storage_backend(&config.storage_backend, config.database_url.as_deref())?;
    tracing::info!(backend = %config.storage_backend, "connecting storage");
    let storage = create_storage_backend(backend).await?;

    let one_time_tokens = one_time_token_broker(&config)?;

    let (state, audit_writer) = AppState::new(config.clone(), storage, one_time_tokens);

    // Load or bootstrap the signing key before taking traffic
    let credentials = state.signing_keys.get_active_signing_credentials().await?;
    tracing::info!(kid = %credentials.key_id(), "signing key ready");

    let app = build_router(state);

    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    {
        let tracker = tracker.clone();
        let inner_token = token.clone();

        let ctrl_c = async {
            if let Err(err) = signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to install signal handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::spawn(async move {
            tokio::select! {
                () = inner_token.cancelled() => { },
                _ = terminate => {},
                _ = ctrl_c => {},
            }

            tracker.close();
            inner_token.cancel();
        });
    }

    tracker.spawn(audit_writer.run(token.clone()));

    {
        let inner_config = config.clone();
        let inner_token = token.clone();
        tracker.spawn(async move {
            let bind_address = format!("0.0.0.0:{}", inner_config.http_port.as_ref());
            tracing::info!("Starting server on {bind_address}");

            let listener = match TcpListener::bind(&bind_address).await {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::error!(error = %err, "failed to bind {bind_address}");
                    inner_token.cancel();
                    return;
                }
            };

            let shutdown_token = inner_token.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    tokio::select! {
                        () = shutdown_token.cancelled() => { }
                    }
                    tracing::info!("axum graceful shutdown complete");
                })
                .await;
            if let Err(err) = result {
                tracing::error!("axum task failed: {}", err);
            }

            inner_token.cancel();
        });
    }

    tracker.wait().await;

    Ok(())
}

#[cfg(feature = "redis")]
fn one_time_token_broker(config: &Config) -> Result<Arc<dyn OneTimeTokenBroker>> {
    match config.redis_url.as_deref() {
        Some(redis_url) => {
            tracing::info!("using redis one-time token broker");
            let broker = authd::oauth::RedisOneTimeTokenBroker::from_url(redis_url)?;
            Ok(Arc::new(broker))
        }
        None => Ok(Arc::new(MemoryOneTimeTokenBroker::new())),
    }
}

#[cfg(not(feature = "redis"))]
fn one_time_token_broker(config: &Config) -> Result<Arc<dyn OneTimeTokenBroker>> {
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but redis support is not compiled in");
    }
    Ok(Arc::new(MemoryOneTimeTokenBroker::new()))
}
