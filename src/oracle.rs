//! Live price oracle.
//!
//! Composes the store, the rate-limited queue, the fetch collaborator, and
//! the gap scanner into one handle. Reads prefer the store; misses go
//! upstream through the queue at high priority and are written back, so every
//! fetched sample becomes part of the permanent history.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::OracleConfig;
use crate::error::{OracleError, Result};
use crate::fetch::PriceFetcher;
use crate::models::{
    align, now, PricePoint, Priority, StopPriceData, StopPriceQuery, StopPriceSource,
};
use crate::queue::RequestQueue;
use crate::scanner::{GapScanner, ScannerConfig};
use crate::store::PriceStore;

struct OracleInner {
    config: OracleConfig,
    store: PriceStore,
    queue: RequestQueue,
    fetcher: Arc<dyn PriceFetcher>,
    scanner: Arc<GapScanner>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Notify,
}

/// Shared oracle handle. Cheap to clone.
#[derive(Clone)]
pub struct PriceOracle {
    inner: Arc<OracleInner>,
}

impl PriceOracle {
    /// Open the oracle against the configured database file.
    pub fn open(config: OracleConfig, fetcher: Arc<dyn PriceFetcher>) -> Result<Self> {
        let store = PriceStore::open(&config.db_path, config.price_ival)?;
        Self::with_store(config, store, fetcher)
    }

    /// Open against an in-memory store (for testing).
    pub fn open_memory(config: OracleConfig, fetcher: Arc<dyn PriceFetcher>) -> Result<Self> {
        let store = PriceStore::open_memory(config.price_ival)?;
        Self::with_store(config, store, fetcher)
    }

    pub fn with_store(
        config: OracleConfig,
        store: PriceStore,
        fetcher: Arc<dyn PriceFetcher>,
    ) -> Result<Self> {
        let queue = RequestQueue::new(config.queue_interval);
        let scanner = Arc::new(GapScanner::new(
            store.clone(),
            queue.clone(),
            Arc::clone(&fetcher),
            ScannerConfig::from_oracle(&config),
        ));

        Ok(Self {
            inner: Arc::new(OracleInner {
                config,
                store,
                queue,
                fetcher,
                scanner,
                poll_task: Mutex::new(None),
                shutdown: Notify::new(),
            }),
        })
    }

    pub fn store(&self) -> &PriceStore {
        &self.inner.store
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.inner.queue
    }

    pub fn scanner(&self) -> &Arc<GapScanner> {
        &self.inner.scanner
    }

    /// Start the background tasks: the queue worker, the periodic gap scan,
    /// and a poll loop that keeps the latest price warm. Idempotent.
    pub fn start(&self) {
        self.inner.queue.start();
        self.inner.scanner.start();

        let mut task = self.inner.poll_task.lock();
        if task.is_some() {
            warn!("price oracle already running");
            return;
        }

        let oracle = self.clone();
        let ival = self.inner.config.price_ival;
        *task = Some(tokio::spawn(async move {
            loop {
                if let Err(err) = oracle.latest_price().await {
                    warn!(error = %err, "latest price poll failed");
                }
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(ival)) => {}
                    _ = oracle.inner.shutdown.notified() => break,
                }
            }
            info!("price poll loop exited");
        }));
        info!("price oracle started");
    }

    /// Stop the background tasks. In-flight queue operations run to
    /// completion; the poll loop exits at its next tick.
    pub fn stop(&self) {
        self.inner.shutdown.notify_waiters();
        if let Some(task) = self.inner.poll_task.lock().take() {
            drop(task);
        }
        self.inner.scanner.stop();
        self.inner.queue.stop();
        info!("price oracle stopped");
    }

    /// The freshest price. Served from the store when the newest sample is
    /// within one interval of now; otherwise fetched upstream at high
    /// priority and written back.
    pub async fn latest_price(&self) -> Result<PricePoint> {
        let ival = self.inner.config.price_ival;
        if let Some(point) = self.inner.store.latest()? {
            if point.stamp >= now().saturating_sub(ival) {
                return Ok(point);
            }
        }

        let fetcher = Arc::clone(&self.inner.fetcher);
        let point = self
            .inner
            .queue
            .run(async move { fetcher.latest().await }, Priority::High)
            .await?;
        self.inner.store.insert(point.price, point.stamp)?;
        Ok(PricePoint {
            price: point.price,
            stamp: align(point.stamp, ival),
        })
    }

    /// Fetch and persist history for `[start_stamp, end_stamp]` at high
    /// priority, returning the fetched points.
    pub async fn price_history(&self, start_stamp: u64, end_stamp: u64) -> Result<Vec<PricePoint>> {
        let fetcher = Arc::clone(&self.inner.fetcher);
        let points = self
            .inner
            .queue
            .run(
                async move { fetcher.history(start_stamp, end_stamp).await },
                Priority::High,
            )
            .await?;
        for point in &points {
            self.inner.store.insert(point.price, point.stamp)?;
        }
        Ok(points)
    }

    /// The price at an aligned stamp. A store miss fetches the surrounding
    /// window upstream, writes it back, and retries against the result.
    pub async fn price_at(&self, stamp: u64) -> Result<Option<PricePoint>> {
        let ival = self.inner.config.price_ival;
        let aligned = align(stamp, ival);
        if let Some(point) = self.inner.store.at(aligned)? {
            return Ok(Some(point));
        }

        let fetched = self
            .price_history(aligned.saturating_sub(ival), aligned + ival)
            .await?;
        if let Some(point) = self.inner.store.at(aligned)? {
            return Ok(Some(point));
        }
        // Upstream may not have a sample on the exact bucket; fall back to
        // the first fetched point in the window.
        Ok(fetched.first().copied())
    }

    /// Resolve a threshold-crossing query against the stored history.
    ///
    /// The stop point is the start point itself when the threshold already
    /// holds there, the close point when it holds there, and otherwise the
    /// earliest stored sample strictly below the threshold inside the window.
    pub async fn stop_price_data(&self, query: &StopPriceQuery) -> Result<StopPriceData> {
        let now_stamp = now();
        let curr_stamp = query.curr_stamp.unwrap_or(now_stamp);

        let start_point = if query.start_stamp >= now_stamp {
            self.latest_price().await?
        } else {
            self.price_at(query.start_stamp).await?.ok_or_else(|| {
                OracleError::NotFound(format!(
                    "no price available at start stamp {}",
                    query.start_stamp
                ))
            })?
        };

        let close_point = if curr_stamp == query.start_stamp {
            start_point
        } else if curr_stamp >= now_stamp {
            self.latest_price().await?
        } else {
            self.price_at(curr_stamp).await?.ok_or_else(|| {
                OracleError::NotFound(format!("no price available at stamp {curr_stamp}"))
            })?
        };

        let stop = if query.thold_price >= start_point.price {
            Some(start_point)
        } else if query.thold_price >= close_point.price {
            Some(close_point)
        } else {
            self.inner
                .store
                .first_below(query.thold_price, start_point.stamp, close_point.stamp)?
        };

        Ok(StopPriceData {
            close_price: close_point.price,
            close_stamp: close_point.stamp,
            start_price: start_point.price,
            start_stamp: start_point.stamp,
            stop_price: stop.map(|p| p.price),
            stop_stamp: stop.map(|p| p.stamp),
        })
    }
}

#[async_trait::async_trait]
impl StopPriceSource for PriceOracle {
    async fn get_stop_price(&self, query: &StopPriceQuery) -> Result<StopPriceData> {
        self.stop_price_data(query).await
    }
}
