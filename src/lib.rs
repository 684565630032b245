//! # redshard
//!
//! A transparent, consistent-hashing sharding proxy for a RESP
//! (REdis Serialization Protocol) key-value cache.

pub mod backend;
pub mod cli;
pub mod conn;
pub mod constants;
pub mod dispatch;
pub mod errors;
#[macro_use]
pub mod macros;
pub mod metrics;
pub mod resp;
pub mod ring;
pub mod server;

/// Shorthand for the top-level application result type every fallible path
/// in `main` eventually collapses into.
pub type Result<T> = std::result::Result<T, errors::ApplicationError>;
