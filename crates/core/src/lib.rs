//! Marketplace Core - Shared types and wire protocol.
//!
//! This crate provides the types used across all marketplace components:
//! - `server` - TCP and HTTP command server
//! - `cli` - Command-line client and database migrations
//!
//! # Architecture
//!
//! The core crate contains only types, the protocol envelope and the frame
//! codec - no database access, no sockets. The codec plugs into
//! `tokio_util::codec::Framed` so both the server and the client share one
//! definition of the wire format.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for IDs, prices, keywords, roles and catalog enums
//! - [`protocol`] - Request/response envelope, command codes and payload shapes
//! - [`codec`] - Length-prefixed JSON framing

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod codec;
pub mod protocol;
pub mod types;

pub use types::*;
