//! Unified error handling with Sentry integration.
//!
//! Every service returns `Result<T, AppError>`. An `AppError` knows its wire
//! [`ErrorKind`], how to render itself as a protocol [`Response`] for TCP
//! clients, and how to render itself as an HTTP response. Server-side
//! failures are captured to Sentry on the way out.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response as HttpResponse},
};
use thiserror::Error;

use marketplace_core::ProductId;
use marketplace_core::codec::MalformedFrame;
use marketplace_core::protocol::{ErrorKind, Response};

use crate::db::RepositoryError;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// The request could not be decoded.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// No valid session for the presented token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The presented session has expired.
    #[error("Session expired")]
    SessionExpired,

    /// Authenticated, but not allowed to do this.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A field failed validation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Not enough stock for the requested quantity.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// A store call failed.
    #[error("Store unavailable while trying to {operation} {entity}: {source}")]
    StoreUnavailable {
        entity: &'static str,
        operation: &'static str,
        #[source]
        source: RepositoryError,
    },

    /// A linked update stopped half-way.
    #[error("Partial update: {0}")]
    PartialUpdate(String),
}

impl AppError {
    /// Wire error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedFrame(_) => ErrorKind::MalformedFrame,
            Self::Unauthorized(_) | Self::SessionExpired => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::PartialUpdate(_) => ErrorKind::PartialUpdate,
        }
    }

    /// Whether this is the server's fault rather than the client's.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. } | Self::PartialUpdate(_))
    }

    /// Client-facing message. Store internals are not exposed.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::StoreUnavailable {
                entity, operation, ..
            } => format!("Storage is unavailable ({operation} {entity}), please retry"),
            _ => self.to_string(),
        }
    }

    /// Render as a protocol response, reporting server errors.
    #[must_use]
    pub fn to_response(&self) -> Response {
        self.report();
        if matches!(self, Self::SessionExpired) {
            return Response::timeout("Session expired, please log in again");
        }
        Response::error(self.kind(), self.public_message())
    }

    /// Wrap a repository failure, keeping `NotFound` as a client error.
    #[must_use]
    pub fn store(entity: &'static str, operation: &'static str, source: RepositoryError) -> Self {
        match source {
            RepositoryError::NotFound => Self::NotFound(format!("{entity} not found")),
            source => Self::StoreUnavailable {
                entity,
                operation,
                source,
            },
        }
    }

    /// Capture server errors to Sentry.
    fn report(&self) {
        if self.is_server_error() {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }
    }
}

/// HTTP status for a wire error kind.
#[must_use]
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::MalformedFrame | ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InsufficientStock => StatusCode::CONFLICT,
        ErrorKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::PartialUpdate => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> HttpResponse {
        let status = status_for(self.kind());
        (status, Json(self.to_response())).into_response()
    }
}

impl From<MalformedFrame> for AppError {
    fn from(err: MalformedFrame) -> Self {
        Self::MalformedFrame(err.reason)
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Attach store context to repository results.
pub trait StoreContext<T> {
    /// Map a repository failure to an `AppError` naming what was being done.
    ///
    /// `RepositoryError::NotFound` becomes `AppError::NotFound`; everything
    /// else becomes `AppError::StoreUnavailable`.
    ///
    /// # Errors
    ///
    /// Returns the mapped error when `self` is an `Err`.
    fn store_context(self, entity: &'static str, operation: &'static str) -> Result<T>;
}

impl<T> StoreContext<T> for std::result::Result<T, RepositoryError> {
    fn store_context(self, entity: &'static str, operation: &'static str) -> Result<T> {
        self.map_err(|source| AppError::store(entity, operation, source))
    }
}
