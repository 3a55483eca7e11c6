//! Serve command implementation

use crate::api::{create_router, AppState};
use crate::cli::ServeArgs;
use crate::config::GatewayConfig;
use crate::gateway::GatewayBuilder;
use crate::logging::init_tracing;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Load configuration with CLI overrides
///
/// Precedence: CLI flags, then environment, then the file, then defaults.
/// A missing file is not an error for `serve`; defaults are used.
pub fn load_config_with_overrides(args: &ServeArgs) -> anyhow::Result<GatewayConfig> {
    let mut config = if args.config.exists() {
        GatewayConfig::load(Some(&args.config))
            .with_context(|| format!("failed to load {}", args.config.display()))?
    } else {
        tracing::debug!("Config file not found, using defaults");
        GatewayConfig::default()
    };

    config = config.with_env_overrides();

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(ref host) = args.host {
        config.server.host = host.clone();
    }
    if let Some(ref log_level) = args.log_level {
        config.logging.level = log_level.clone();
    }
    if args.no_cache {
        config.cache.enabled = false;
    }
    if args.no_store {
        config.store.enabled = false;
    }

    Ok(config)
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
        _ = cancel_token.cancelled() => {}
    }

    cancel_token.cancel();
}

/// Main serve command handler
pub async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = load_config_with_overrides(&args)?;
    config.validate()?;

    init_tracing(&config.logging)?;

    tracing::info!("Starting Meridian gateway");
    tracing::debug!(?config, "Loaded configuration");

    let server = config.server.clone();
    let gateway = Arc::new(
        GatewayBuilder::new(config)
            .build()
            .await
            .context("failed to assemble gateway")?,
    );
    gateway.restore().await;

    let cancel_token = CancellationToken::new();
    let background = gateway.start_background(cancel_token.clone());

    let app = create_router(Arc::new(AppState::new(Arc::clone(&gateway))), &server);

    let addr = server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "Meridian API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token.clone()))
        .await?;

    // Background tasks stop on the same token; the flusher does a final flush
    let grace = Duration::from_secs(server.shutdown_grace_seconds);
    let drained = tokio::time::timeout(grace, futures::future::join_all(background)).await;
    if drained.is_err() {
        tracing::warn!(
            grace_seconds = server.shutdown_grace_seconds,
            "Background tasks did not stop within grace period"
        );
    }

    if let Err(e) = gateway.persist().await {
        tracing::error!(error = %e, "Failed to persist gateway state");
    }

    tracing::info!("Meridian gateway stopped");
    Ok(())
}
