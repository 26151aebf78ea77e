//! Core types for the marketplace.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod catalog;
pub mod id;
pub mod keywords;
pub mod price;
pub mod session;

pub use catalog::{Category, Condition, ParseEnumError, Rating, Role};
pub use id::*;
pub use keywords::{Keywords, KeywordsError};
pub use price::{Price, PriceError};
pub use session::SessionToken;
