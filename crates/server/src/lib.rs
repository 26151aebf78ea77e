//! Marketplace server library.
//!
//! Buyers and sellers talk to the server over a length-prefixed JSON wire
//! protocol on TCP, or over the equivalent HTTP command endpoint. Both
//! surfaces feed the same [`dispatch::Dispatcher`].
//!
//! This crate provides the server as a library so the binary, the CLI and
//! the integration tests can all start it the same way.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod tcp;

use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::config::StoreConfig;
use crate::db::Stores;
use crate::services::SessionRegistry;
use crate::state::AppState;

/// How often expired sessions are swept.
pub const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Errors that stop the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Open the configured storage backend.
///
/// # Errors
///
/// Returns `StartupError` if the database cannot be reached or migrations fail.
pub async fn open_stores(config: &StoreConfig) -> Result<Stores, StartupError> {
    match config {
        StoreConfig::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Ok(Stores::memory())
        }
        StoreConfig::Postgres {
            database_url,
            run_migrations,
        } => {
            let pool = db::create_pool(database_url).await?;
            tracing::info!("Database pool created");
            if *run_migrations {
                db::run_migrations(&pool).await?;
                tracing::info!("Migrations applied");
            }
            Ok(Stores::postgres(pool))
        }
    }
}

/// Build the HTTP application with tracing and Sentry layers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::routes())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction())
}

/// Serve the wire protocol and HTTP until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if either listener fails.
pub async fn serve(
    state: AppState,
    tcp: TcpListener,
    http: TcpListener,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let timing = state.config().session;
    let wire = tcp::serve(tcp, state.dispatcher().clone(), timing, shutdown.clone());

    tracing::info!(addr = %http.local_addr()?, "HTTP listening");
    let web = axum::serve(http, app(state)).with_graceful_shutdown(shutdown.cancelled_owned());

    tokio::try_join!(wire, async { web.await })?;
    Ok(())
}

/// Periodically remove expired sessions until `shutdown` is cancelled.
pub fn spawn_session_purger(
    sessions: SessionRegistry,
    every: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = sessions.purge_expired().await {
                        tracing::warn!(error = %e, "Session purge failed");
                    }
                }
            }
        }
    })
}
