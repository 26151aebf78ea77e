//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `MARKET_DATABASE_URL` - `PostgreSQL` connection string (only when
//!   `MARKET_STORE=postgres`; falls back to `DATABASE_URL`)
//!
//! ## Optional
//! - `MARKET_HOST` - Bind address (default: 127.0.0.1)
//! - `MARKET_TCP_PORT` - Wire protocol port (default: 50000)
//! - `MARKET_HTTP_PORT` - HTTP port (default: 8080)
//! - `MARKET_STORE` - `memory` or `postgres` (default: memory)
//! - `MARKET_RUN_MIGRATIONS` - Run migrations at start-up (default: false)
//! - `MARKET_SESSION_TTL_SECS` - Session lifetime (default: 86400)
//! - `MARKET_IDLE_WARNING_SECS` - Idle time before a warning (default: 240)
//! - `MARKET_IDLE_GRACE_SECS` - Further idle time before logout (default: 60)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Which backend holds the data.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// Everything in process memory; lost on restart.
    Memory,
    /// `PostgreSQL`.
    Postgres {
        /// Connection URL (contains password)
        database_url: SecretString,
        /// Apply pending migrations before serving
        run_migrations: bool,
    },
}

/// Session and connection timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Absolute lifetime of a session after login
    pub ttl: Duration,
    /// Silence on a TCP connection before the client is warned
    pub idle_warning: Duration,
    /// Further silence after the warning before the session is revoked
    pub idle_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            idle_warning: Duration::from_secs(4 * 60),
            idle_grace: Duration::from_secs(60),
        }
    }
}

/// Server application configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// IP address to bind both listeners to
    pub host: IpAddr,
    /// Wire protocol port
    pub tcp_port: u16,
    /// HTTP port
    pub http_port: u16,
    /// Storage backend
    pub store: StoreConfig,
    /// Session timing
    pub session: SessionConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let host = parse_env("MARKET_HOST", "127.0.0.1")?;
        let tcp_port = parse_env("MARKET_TCP_PORT", "50000")?;
        let http_port = parse_env("MARKET_HTTP_PORT", "8080")?;

        let store = match get_env_or_default("MARKET_STORE", "memory").as_str() {
            "memory" => StoreConfig::Memory,
            "postgres" => StoreConfig::Postgres {
                database_url: get_database_url("MARKET_DATABASE_URL")?,
                run_migrations: parse_env("MARKET_RUN_MIGRATIONS", "false")?,
            },
            other => {
                return Err(ConfigError::InvalidEnvVar(
                    "MARKET_STORE".to_string(),
                    format!("expected 'memory' or 'postgres', got '{other}'"),
                ));
            }
        };

        let session = SessionConfig {
            ttl: parse_secs("MARKET_SESSION_TTL_SECS", "86400")?,
            idle_warning: parse_secs("MARKET_IDLE_WARNING_SECS", "240")?,
            idle_grace: parse_secs("MARKET_IDLE_GRACE_SECS", "60")?,
        };

        Ok(Self {
            host,
            tcp_port,
            http_port,
            store,
            session,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for the wire protocol listener.
    #[must_use]
    pub const fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.tcp_port)
    }

    /// Returns the socket address for the HTTP listener.
    #[must_use]
    pub const fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.http_port)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable (or its default) into `T`.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(key, &get_env_or_default(key, default))
}

/// Parse a whole number of seconds.
fn parse_secs(key: &str, default: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_env(key, default)?;
    if secs == 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_port() {
        let port: u16 = parse_value("MARKET_TCP_PORT", "50000").unwrap();
        assert_eq!(port, 50000);
    }

    #[test]
    fn test_parse_value_invalid() {
        let result: Result<u16, _> = parse_value("MARKET_TCP_PORT", "not-a-port");
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar(key, _)) if key == "MARKET_TCP_PORT"));
    }

    #[test]
    fn test_parse_value_host() {
        let host: IpAddr = parse_value("MARKET_HOST", " 0.0.0.0 ").unwrap();
        assert!(host.is_unspecified());
    }

    #[test]
    fn test_session_defaults() {
        let session = SessionConfig::default();
        assert_eq!(session.idle_warning, Duration::from_secs(240));
        assert_eq!(session.idle_grace, Duration::from_secs(60));
    }

    #[test]
    fn test_socket_addrs() {
        let config = ServerConfig {
            host: IpAddr::from([127, 0, 0, 1]),
            tcp_port: 1,
            http_port: 2,
            store: StoreConfig::Memory,
            session: SessionConfig::default(),
            sentry_dsn: None,
            sentry_environment: None,
        };
        assert_eq!(config.tcp_addr().port(), 1);
        assert_eq!(config.http_addr().port(), 2);
    }
}
