//! Session registry.
//!
//! Issues opaque tokens, resolves them back to `(user, role)` and revokes
//! them. Every operation is a single keyed store call, so each token sees
//! its operations in order while different tokens never wait on each other.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use rand::RngCore;
use thiserror::Error;

use marketplace_core::{AccountId, Role, SessionToken};

use crate::db::{RepositoryError, SessionStore};
use crate::error::AppError;
use crate::models::Session;

/// Random bytes per token.
const TOKEN_BYTES: usize = 32;

/// Session lookup failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("session expired")]
    Expired,

    #[error("session store error: {0}")]
    Store(#[from] RepositoryError),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => Self::Unauthorized("Invalid or missing session".to_string()),
            SessionError::Expired => Self::SessionExpired,
            SessionError::Store(source) => Self::StoreUnavailable {
                entity: "session",
                operation: "resolve",
                source,
            },
        }
    }
}

/// Issues and resolves session tokens.
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    ttl: chrono::Duration,
}

impl SessionRegistry {
    /// Create a registry whose sessions live for `ttl`.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self { store, ttl }
    }

    /// Start a session for `user_id` and return its token.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` if the session cannot be stored.
    #[tracing::instrument(skip_all, fields(user_id = %user_id, role = %role))]
    pub async fn create(&self, user_id: AccountId, role: Role) -> Result<SessionToken, SessionError> {
        let created_at = Utc::now();
        let session = Session {
            token: generate_token(),
            user_id,
            role,
            created_at,
            expires_at: created_at
                .checked_add_signed(self.ttl)
                .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC),
        };
        self.store.insert_session(&session).await?;
        tracing::debug!("Session created");
        Ok(session.token)
    }

    /// Look up the session behind `token`.
    ///
    /// Sessions are never renewed here. An expired session is deleted and
    /// reported as `Expired`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for unknown tokens,
    /// `SessionError::Expired` for stale ones.
    pub async fn resolve(&self, token: &SessionToken) -> Result<Session, SessionError> {
        if token.is_empty() {
            return Err(SessionError::NotFound);
        }
        let session = self
            .store
            .get_session(token)
            .await?
            .ok_or(SessionError::NotFound)?;

        if session.is_expired_at(Utc::now()) {
            self.store.delete_session(token).await?;
            tracing::debug!(user_id = %session.user_id, "Expired session removed");
            return Err(SessionError::Expired);
        }
        Ok(session)
    }

    /// End a session. Revoking an unknown token is not an error.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` if the store call fails.
    pub async fn revoke(&self, token: &SessionToken) -> Result<(), SessionError> {
        if self.store.delete_session(token).await? {
            tracing::debug!("Session revoked");
        }
        Ok(())
    }

    /// End every session belonging to `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` if the store call fails.
    pub async fn revoke_all_for(&self, user_id: AccountId) -> Result<u64, SessionError> {
        Ok(self.store.delete_sessions_for(user_id).await?)
    }

    /// Remove every expired session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` if the store call fails.
    pub async fn purge_expired(&self) -> Result<u64, SessionError> {
        let removed = self.store.delete_expired_sessions(Utc::now()).await?;
        if removed > 0 {
            tracing::info!(removed, "Purged expired sessions");
        }
        Ok(removed)
    }

    /// Store round-trip for readiness checks.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` if the store cannot be reached.
    pub async fn ping(&self) -> Result<(), SessionError> {
        Ok(self.store.ping().await?)
    }
}

/// 32 random bytes, URL-safe base64 without padding.
fn generate_token() -> SessionToken {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    SessionToken::new(URL_SAFE_NO_PAD.encode(bytes))
}
