//! Core data types shared across the oracle.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single price sample. `stamp` is always an integer multiple of the
/// configured alignment interval once it passes through the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: u64,
    pub stamp: u64,
}

/// Dispatch priority for queued upstream requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Low,
}

/// Query for a threshold-crossing lookup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StopPriceQuery {
    /// Start of the observation range.
    pub start_stamp: u64,
    /// End of the observation range. Defaults to now when absent.
    pub curr_stamp: Option<u64>,
    /// Threshold price the caller is watching.
    pub thold_price: u64,
}

/// Result of a threshold-crossing lookup. `stop_price` is non-null iff the
/// price was observed at or below the threshold strictly after `start_stamp`
/// and at or before the close stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopPriceData {
    pub close_price: u64,
    pub close_stamp: u64,
    pub start_price: u64,
    pub start_stamp: u64,
    pub stop_price: Option<u64>,
    pub stop_stamp: Option<u64>,
}

/// Signed commitment/reveal attestation produced by the quote protocol.
///
/// `thold_key` is revealed only when the quote is expired (threshold was
/// crossed); `thold_hash` is always present so repeated queries for the same
/// triple are linkable to the same commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub oracle_pk: String,
    pub curr_price: u64,
    pub curr_stamp: u64,
    pub quote_price: u64,
    pub quote_stamp: u64,
    pub stop_price: Option<u64>,
    pub stop_stamp: Option<u64>,
    pub thold_price: u64,
    pub thold_hash: String,
    pub thold_key: Option<String>,
    pub is_expired: bool,
    pub req_id: String,
    pub req_sig: String,
}

/// A source of threshold-crossing data. Implemented by the live oracle
/// (store + fetch collaborator) and by the deterministic simulator, so the
/// quote protocol can run against either.
#[async_trait]
pub trait StopPriceSource: Send + Sync {
    async fn get_stop_price(&self, query: &StopPriceQuery) -> Result<StopPriceData>;
}

/// Current Unix time in whole seconds.
pub fn now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Floor-round a stamp to the nearest alignment interval.
pub fn align(stamp: u64, ival: u64) -> u64 {
    (stamp / ival) * ival
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_floors_to_interval() {
        assert_eq!(align(0, 300), 0);
        assert_eq!(align(299, 300), 0);
        assert_eq!(align(300, 300), 300);
        assert_eq!(align(750, 300), 600);
    }

    #[test]
    fn test_align_is_idempotent() {
        for ival in [1u64, 60, 300, 3600] {
            for stamp in [0u64, 1, 299, 300, 86_399, 86_400, 1_700_000_123] {
                let once = align(stamp, ival);
                assert_eq!(align(once, ival), once);
            }
        }
    }
}
