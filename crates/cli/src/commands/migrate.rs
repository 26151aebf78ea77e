//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! mkt migrate
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! Migration files live in `crates/server/migrations/` and are embedded in
//! the server crate, so the CLI and a server started with
//! `MARKET_RUN_MIGRATIONS=true` apply the same set.

use secrecy::SecretString;

/// Errors that can occur while migrating.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Apply all pending migrations.
///
/// # Errors
///
/// Returns an error if no database URL is configured, the database cannot be
/// reached, or a migration fails.
pub async fn run() -> Result<(), MigrationError> {
    let database_url = std::env::var("MARKET_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| MigrationError::MissingEnvVar("MARKET_DATABASE_URL"))?;

    tracing::info!("Connecting to database...");
    let pool = marketplace_server::db::create_pool(&database_url).await?;

    tracing::info!("Running migrations...");
    marketplace_server::db::run_migrations(&pool).await?;

    tracing::info!("Migrations complete!");
    Ok(())
}
