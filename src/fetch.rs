//! Fetch collaborator for upstream price data.
//!
//! The core treats the live HTTP client and the simulator as interchangeable
//! implementations of `PriceFetcher`. One of the two is chosen at startup and
//! held behind a shared reference for the life of the process.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::OracleConfig;
use crate::error::{OracleError, Result};
use crate::models::{align, now, PricePoint};
use crate::sim::PriceSimulator;

#[async_trait]
pub trait PriceFetcher: Send + Sync {
    /// Fetch the most recent price sample.
    async fn latest(&self) -> Result<PricePoint>;

    /// Fetch price history for `[start_stamp, end_stamp]`.
    async fn history(&self, start_stamp: u64, end_stamp: u64) -> Result<Vec<PricePoint>>;
}

// =============================================================================
// Live fetcher
// =============================================================================

#[derive(Debug, Deserialize)]
struct LatestPriceResponse {
    bitcoin: LatestPriceEntry,
}

#[derive(Debug, Deserialize)]
struct LatestPriceEntry {
    usd: f64,
    last_updated_at: u64,
}

#[derive(Debug, Deserialize)]
struct MarketChartResponse {
    /// Pairs of (millisecond stamp, price).
    prices: Vec<(f64, f64)>,
}

/// Upstream market-data client. Stamps are aligned on ingest so cached keys
/// match what the store would produce at write time.
pub struct LiveFetcher {
    client: reqwest::Client,
    host: String,
    api_key: String,
    ival: u64,
}

impl LiveFetcher {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let host = config
            .api_host
            .clone()
            .ok_or_else(|| OracleError::Config("ORACLE_API_HOST variable is undefined".into()))?;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| OracleError::Config("ORACLE_API_KEY variable is undefined".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| OracleError::Config(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            host,
            api_key,
            ival: config.price_ival,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.host.trim_end_matches('/'), path);
        debug!(%url, "fetching upstream price data");

        let response = self
            .client
            .get(&url)
            .query(params)
            .header("accept", "application/json")
            .header("x-cg-pro-api-key", &self.api_key)
            .send()
            .await
            .map_err(|err| OracleError::Fetch(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Fetch(format!(
                "upstream returned {status} for {path}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| OracleError::Fetch(format!("invalid upstream payload: {err}")))
    }
}

#[async_trait]
impl PriceFetcher for LiveFetcher {
    async fn latest(&self) -> Result<PricePoint> {
        let params = [
            ("ids", "bitcoin".to_string()),
            ("vs_currencies", "usd".to_string()),
            ("include_last_updated_at", "true".to_string()),
        ];
        let body: LatestPriceResponse = self.get_json("/simple/price", &params).await?;

        let point = PricePoint {
            price: body.bitcoin.usd.round() as u64,
            stamp: align(body.bitcoin.last_updated_at, self.ival),
        };
        debug!(price = point.price, stamp = point.stamp, "latest price fetched");
        Ok(point)
    }

    async fn history(&self, start_stamp: u64, end_stamp: u64) -> Result<Vec<PricePoint>> {
        let params = [
            ("vs_currency", "usd".to_string()),
            ("from", start_stamp.to_string()),
            ("to", end_stamp.to_string()),
            ("precision", "0".to_string()),
        ];
        let body: MarketChartResponse = self
            .get_json("/coins/bitcoin/market_chart/range", &params)
            .await?;

        let points = body
            .prices
            .iter()
            .map(|&(stamp_ms, price)| PricePoint {
                price: price.round() as u64,
                stamp: align((stamp_ms / 1000.0) as u64, self.ival),
            })
            .collect::<Vec<_>>();
        debug!(count = points.len(), "price history fetched");
        Ok(points)
    }
}

// =============================================================================
// Simulated fetcher
// =============================================================================

/// Deterministic fetcher backed by the price simulator.
pub struct SimulatedFetcher {
    sim: PriceSimulator,
    ival: u64,
}

impl SimulatedFetcher {
    pub fn new(sim: PriceSimulator, ival: u64) -> Self {
        Self { sim, ival }
    }
}

#[async_trait]
impl PriceFetcher for SimulatedFetcher {
    async fn latest(&self) -> Result<PricePoint> {
        let point = self.sim.point_at(now())?;
        Ok(PricePoint {
            price: point.price,
            stamp: align(point.stamp, self.ival),
        })
    }

    async fn history(&self, start_stamp: u64, end_stamp: u64) -> Result<Vec<PricePoint>> {
        if start_stamp > end_stamp {
            return Err(OracleError::Validation(format!(
                "start stamp {start_stamp} is after end stamp {end_stamp}"
            )));
        }

        // Sample the trajectory at one point per alignment interval; the last
        // trajectory step in each bucket wins, matching store upsert order.
        let mut points: Vec<PricePoint> = Vec::new();
        for point in self.sim.trajectory(start_stamp, end_stamp)? {
            let aligned = align(point.stamp, self.ival);
            match points.last_mut() {
                Some(last) if last.stamp == aligned => last.price = point.price,
                _ => points.push(PricePoint {
                    price: point.price,
                    stamp: aligned,
                }),
            }
        }
        Ok(points)
    }
}
