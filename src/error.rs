//! Error taxonomy for the oracle core.
//!
//! Infrastructure failures (fetch, storage) are retried or logged close to
//! where they happen; protocol failures (a quote that cannot find a required
//! price point) propagate to the boundary as request failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    /// Bad construction parameters. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Backing store I/O failure. Propagated to the caller, never swallowed.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Upstream provider failure. Caught and logged at the queue/scanner
    /// level, downgraded to "no data" for that attempt.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// No price point available for a requested stamp or range.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed query (start > end, out-of-bound threshold).
    #[error("validation error: {0}")]
    Validation(String),

    /// Signing or key-material failure. Should not occur with correct keys.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// The quote protocol required a price point and had none.
    #[error("quote error: {0}")]
    Quote(String),

    /// Plumbing failure (e.g. a queue worker dropped a result handle).
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, OracleError>;
