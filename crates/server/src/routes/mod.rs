//! HTTP route definitions.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health               - Liveness check
//! GET  /health/ready         - Readiness check (store round-trip)
//! POST /api/commands/{code}  - Run one command; body is the JSON payload
//! ```
//!
//! The command endpoint mirrors the wire protocol: the same dispatcher runs
//! the same commands, with the session token taken from an
//! `Authorization: Bearer` header.

pub mod commands;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};

use crate::state::AppState;

/// Build the HTTP routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/api/commands/{code}", post(commands::run))
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if the store is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.services().sessions.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
