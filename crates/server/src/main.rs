//! Marketplace server.
//!
//! Serves the wire protocol (default port 50000) and the HTTP command
//! endpoint with health checks (default port 8080).
//!
//! # Architecture
//!
//! - Length-prefixed JSON frames over TCP, one task per connection
//! - Axum for the HTTP surface
//! - In-memory or `PostgreSQL` storage behind store traits
//! - Argon2 password hashes and opaque session tokens

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::error::Error;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use marketplace_server::config::ServerConfig;
use marketplace_server::services::Services;
use marketplace_server::state::AppState;
use marketplace_server::{SESSION_PURGE_INTERVAL, open_stores, serve, spawn_session_purger};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &ServerConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "marketplace_server=info,tower_http=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }
}

async fn run(config: ServerConfig) -> Result<(), Box<dyn Error>> {
    let stores = open_stores(&config.store).await?;
    let services = Services::new(stores, config.session);
    let state = AppState::new(config.clone(), services);

    let tcp = TcpListener::bind(config.tcp_addr()).await?;
    let http = TcpListener::bind(config.http_addr()).await?;

    let shutdown = CancellationToken::new();
    let purger = spawn_session_purger(
        state.services().sessions.clone(),
        SESSION_PURGE_INTERVAL,
        shutdown.clone(),
    );

    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });

    serve(state, tcp, http, shutdown.clone()).await?;
    shutdown.cancel();
    purger.await?;
    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
