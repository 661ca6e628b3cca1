//! Cryptographic price oracle.
//!
//! Maintains an interval-aligned price history, serves threshold-crossing
//! queries over it, and issues signed commitment/reveal quotes. Upstream
//! traffic is serialized through a rate-limited priority queue; a background
//! scanner finds and backfills gaps in the history. A deterministic simulator
//! stands in for the live price source in offline mode.

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fetch;
pub mod models;
pub mod oracle;
pub mod queue;
pub mod quote;
pub mod scanner;
pub mod sim;
pub mod store;

pub use error::{OracleError, Result};
