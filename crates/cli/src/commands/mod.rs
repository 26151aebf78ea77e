//! Subcommands.
//!
//! Buyer and seller subcommands each turn into one wire request; `migrate`
//! talks to the database directly.

pub mod buyer;
pub mod migrate;
pub mod seller;

use marketplace_core::KeywordsError;

/// Errors building a request from command-line arguments.
#[derive(Debug, thiserror::Error)]
pub enum ArgumentError {
    #[error("invalid keywords: {0}")]
    Keywords(#[from] KeywordsError),

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}
