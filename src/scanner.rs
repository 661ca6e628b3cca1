//! Gap detection and backfill.
//!
//! Walks the store's time range in fixed-size windows, newest first, derives
//! gap markers at sub-window granularity, and requests backfill through the
//! queue at low priority. Markers that exhaust their retries are added to a
//! process-lifetime failed set and never retried until restart.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::OracleConfig;
use crate::error::Result;
use crate::fetch::PriceFetcher;
use crate::models::{now, PricePoint, Priority};
use crate::queue::RequestQueue;
use crate::store::PriceStore;

/// Maximum backfill attempts per gap marker.
const MAX_RETRIES: u32 = 3;
/// Gap markers requested per batch.
const GAP_BATCH_SIZE: usize = 5;

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Partition window for the scan walk, in seconds.
    pub window_size: u64,
    /// Granularity at which gap markers are recorded and backfilled.
    pub gap_step: u64,
    /// Base delay for linear retry backoff (`attempt * base`).
    pub retry_base_delay: Duration,
    /// Fixed delay between windows and between batches.
    pub pace_delay: Duration,
    /// Queue depth at which batches pause for backpressure.
    pub max_queue_depth: usize,
    /// How long to pause when the queue is near its ceiling.
    pub backpressure_delay: Duration,
    /// Oldest stamp the periodic scan walks back to.
    pub genesis_stamp: u64,
    /// Seconds between periodic scans.
    pub scan_interval: u64,
}

impl ScannerConfig {
    pub fn from_oracle(config: &OracleConfig) -> Self {
        Self {
            window_size: config.window_size,
            gap_step: config.gap_step,
            genesis_stamp: config.genesis_stamp,
            scan_interval: config.scan_interval,
            ..Self::default()
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            window_size: 60 * 60 * 24,
            gap_step: 60 * 60,
            retry_base_delay: Duration::from_secs(1),
            pace_delay: Duration::from_millis(100),
            max_queue_depth: 32,
            backpressure_delay: Duration::from_millis(250),
            genesis_stamp: 0,
            scan_interval: 60 * 15,
        }
    }
}

pub struct GapScanner {
    store: PriceStore,
    queue: RequestQueue,
    fetcher: Arc<dyn PriceFetcher>,
    config: ScannerConfig,
    /// Window starts that exhausted their retries. Never retried this process.
    failed: Mutex<HashSet<u64>>,
    /// Cooperative cancellation flag, checked between windows and batches.
    running: AtomicBool,
    /// Mutual exclusion for `scan`; a second call while set is a no-op.
    scanning: AtomicBool,
    /// Count of scans that ran to completion (uncancelled).
    scans_completed: AtomicU64,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    wake: Notify,
}

impl GapScanner {
    pub fn new(
        store: PriceStore,
        queue: RequestQueue,
        fetcher: Arc<dyn PriceFetcher>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            fetcher,
            config,
            failed: Mutex::new(HashSet::new()),
            running: AtomicBool::new(true),
            scanning: AtomicBool::new(false),
            scans_completed: AtomicU64::new(0),
            loop_task: Mutex::new(None),
            wake: Notify::new(),
        }
    }

    /// Number of scans that ran to completion.
    pub fn scans_completed(&self) -> u64 {
        self.scans_completed.load(Ordering::SeqCst)
    }

    /// Gap markers that have been permanently abandoned.
    pub fn failed_gaps(&self) -> Vec<u64> {
        self.failed.lock().iter().copied().collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the periodic scan loop. Starting twice warns and no-ops.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.loop_task.lock();
        if task.is_some() {
            warn!("price scanner already running");
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let scanner = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            loop {
                if !scanner.running.load(Ordering::SeqCst) {
                    break;
                }
                let end = now();
                if let Err(err) = scanner.scan(scanner.config.genesis_stamp, end).await {
                    warn!(error = %err, "gap scan failed");
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(scanner.config.scan_interval)) => {}
                    _ = scanner.wake.notified() => {}
                }
            }
            debug!("scanner loop exited");
        }));
    }

    /// Clear the running flag. An in-progress scan exits at its next
    /// cancellation point; the periodic loop stops. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_waiters();
        if let Some(task) = self.loop_task.lock().take() {
            drop(task); // detach; the loop observes the flag and exits
        }
    }

    /// Scan `[start_stamp, end_stamp)` for gaps and backfill them.
    ///
    /// No-op when the range is invalid or another scan is in progress.
    pub async fn scan(&self, start_stamp: u64, end_stamp: u64) -> Result<()> {
        if start_stamp >= end_stamp {
            debug!(start_stamp, end_stamp, "invalid scan range, skipping");
            return Ok(());
        }
        if self
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("scan already in progress, skipping");
            return Ok(());
        }

        let result = self.scan_windows(start_stamp, end_stamp).await;
        self.scanning.store(false, Ordering::SeqCst);

        match &result {
            Ok(true) => {
                self.scans_completed.fetch_add(1, Ordering::SeqCst);
                info!(start_stamp, end_stamp, "scan completed");
            }
            Ok(false) => info!("scan cancelled"),
            Err(_) => {}
        }
        result.map(|_| ())
    }

    /// Returns Ok(true) when the scan ran to completion, Ok(false) when it
    /// was cancelled part-way.
    async fn scan_windows(&self, start_stamp: u64, end_stamp: u64) -> Result<bool> {
        let window_size = self.config.window_size;
        let window_count = (end_stamp - start_stamp).div_ceil(window_size);
        info!(start_stamp, end_stamp, window_count, "starting gap scan");

        let mut processed = 0u64;
        let mut window_end = end_stamp;

        // Walk windows in reverse chronological order.
        while window_end > start_stamp {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(false);
            }

            let window_start = window_end.saturating_sub(window_size).max(start_stamp);
            processed += 1;
            debug!(
                window = processed,
                of = window_count,
                window_start,
                window_end,
                "checking window"
            );

            let saved = self.store.range(window_start, window_end)?;
            let gaps = self.find_gaps(window_start, window_end, &saved);

            if !gaps.is_empty() {
                info!(count = gaps.len(), window_start, "queueing gaps for backfill");
                for batch in gaps.chunks(GAP_BATCH_SIZE) {
                    if !self.running.load(Ordering::SeqCst) {
                        return Ok(false);
                    }
                    // Backpressure: hold off while the queue is near its ceiling.
                    while self.queue.len() >= self.config.max_queue_depth {
                        tokio::time::sleep(self.config.backpressure_delay).await;
                        if !self.running.load(Ordering::SeqCst) {
                            return Ok(false);
                        }
                    }
                    for &gap_start in batch {
                        self.fill_gap(gap_start).await;
                    }
                    tokio::time::sleep(self.config.pace_delay).await;
                }
            }

            tokio::time::sleep(self.config.pace_delay).await;
            window_end = window_start;
        }

        Ok(true)
    }

    /// Derive gap markers for one window from its stored points.
    fn find_gaps(&self, window_start: u64, window_end: u64, saved: &[PricePoint]) -> Vec<u64> {
        let step = self.config.gap_step;
        let failed = self.failed.lock();
        let mut gaps = Vec::new();
        let mut expected = window_start;

        for point in saved {
            if point.stamp.saturating_sub(expected) > step {
                for gap_time in (expected..point.stamp).step_by(step as usize) {
                    if !failed.contains(&gap_time) {
                        gaps.push(gap_time);
                    }
                }
            }
            expected = point.stamp + step;
        }

        if window_end.saturating_sub(expected) >= step {
            for gap_time in (expected..window_end).step_by(step as usize) {
                if !failed.contains(&gap_time) {
                    gaps.push(gap_time);
                }
            }
        }

        gaps
    }

    /// Backfill one gap window, retrying with linear backoff. After the last
    /// failed attempt the marker joins the failed set permanently.
    async fn fill_gap(&self, gap_start: u64) {
        let gap_end = gap_start + self.config.gap_step;

        for attempt in 1..=MAX_RETRIES {
            match self.backfill(gap_start, gap_end).await {
                Ok(count) => {
                    if count > 0 {
                        debug!(gap_start, count, "gap backfilled");
                    }
                    return;
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        gap_start,
                        attempt,
                        max = MAX_RETRIES,
                        "gap backfill attempt failed"
                    );
                    if attempt >= MAX_RETRIES {
                        self.failed.lock().insert(gap_start);
                        info!(gap_start, "gap abandoned after max retries");
                    } else {
                        tokio::time::sleep(self.config.retry_base_delay * attempt).await;
                    }
                }
            }
        }
    }

    /// Fetch one gap window through the queue at low priority and store it.
    async fn backfill(&self, start_stamp: u64, end_stamp: u64) -> Result<usize> {
        let fetcher = Arc::clone(&self.fetcher);
        let points = self
            .queue
            .run(
                async move { fetcher.history(start_stamp, end_stamp).await },
                Priority::Low,
            )
            .await?;

        for point in &points {
            self.store.insert(point.price, point.stamp)?;
        }
        Ok(points.len())
    }
}
