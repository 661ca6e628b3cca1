//! Rate-limited priority queue for upstream requests.
//!
//! A single worker task owns execution, which gives single-flight dispatch:
//! at most one operation runs at any instant. High-priority items dispatch
//! before low-priority items; within a tier, FIFO by arrival. Spacing between
//! dispatches is enforced against the last dispatch time; an early dispatch
//! is delayed, never dropped. Per-item failures are logged, delivered to the
//! submitter's handle, and never halt the loop.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

use crate::error::{OracleError, Result};
use crate::models::Priority;

/// How often the idle worker re-checks for pending items.
const IDLE_TICK: Duration = Duration::from_secs(1);

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct QueueItem {
    job: Job,
    priority: Priority,
    enqueued_at: Instant,
}

struct QueueState {
    high: VecDeque<QueueItem>,
    low: VecDeque<QueueItem>,
    last_dispatch: Option<Instant>,
    /// True while a worker task is live.
    active: bool,
    /// True while an operation is executing; guards single-flight across
    /// stop/start cycles where an old worker may still be mid-operation.
    dispatching: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
    request_interval: Duration,
}

#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    pub fn new(request_interval: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    high: VecDeque::new(),
                    low: VecDeque::new(),
                    last_dispatch: None,
                    active: false,
                    dispatching: false,
                }),
                notify: Notify::new(),
                request_interval,
            }),
        }
    }

    /// Number of items waiting to dispatch.
    pub fn len(&self) -> usize {
        let state = self.inner.state.lock();
        state.high.len() + state.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while the worker loop is running.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().active
    }

    /// Submit an operation for serialized execution. Returns a handle that
    /// resolves exactly as the operation would. Starts the worker if idle.
    pub fn submit<T, F>(&self, op: F, priority: Priority) -> oneshot::Receiver<Result<T>>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let result = op.await;
            if let Err(err) = &result {
                warn!(error = %err, "queued operation failed");
            }
            // The submitter may have dropped its handle; that is not an error.
            let _ = tx.send(result);
        });

        let item = QueueItem {
            job,
            priority,
            enqueued_at: Instant::now(),
        };

        let needs_start = {
            let mut state = self.inner.state.lock();
            match priority {
                Priority::High => state.high.push_back(item),
                Priority::Low => state.low.push_back(item),
            }
            debug!(
                ?priority,
                pending = state.high.len() + state.low.len(),
                "request enqueued"
            );
            !state.active
        };

        if needs_start {
            self.start();
        } else {
            self.inner.notify.notify_one();
        }

        rx
    }

    /// Submit and wait for the result.
    pub async fn run<T, F>(&self, op: F, priority: Priority) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        match self.submit(op, priority).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Internal(
                "queue worker dropped the operation".into(),
            )),
        }
    }

    /// Start the worker loop. Starting twice warns and no-ops.
    pub fn start(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.active {
                warn!("request queue already running");
                return;
            }
            state.active = true;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            worker_loop(inner).await;
        });
    }

    /// Stop the worker loop. Does not abort an in-flight operation; queued
    /// items remain and dispatch resumes on the next start or submit.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            if !state.active {
                return;
            }
            state.active = false;
        }
        self.inner.notify.notify_one();
        debug!("request queue stopped");
    }
}

async fn worker_loop(inner: Arc<QueueInner>) {
    debug!("request queue worker started");
    loop {
        // Idle until something is pending and nothing is mid-flight.
        let ready = {
            let state = inner.state.lock();
            if !state.active {
                break;
            }
            !state.dispatching && (!state.high.is_empty() || !state.low.is_empty())
        };
        if !ready {
            let _ = tokio::time::timeout(IDLE_TICK, inner.notify.notified()).await;
            continue;
        }

        // Enforce spacing before popping, so a high-priority arrival during
        // the wait still wins the next slot.
        let wait = {
            let state = inner.state.lock();
            state.last_dispatch.map(|last| {
                (last + inner.request_interval).saturating_duration_since(Instant::now())
            })
        };
        if let Some(wait) = wait {
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }

        let item = {
            let mut state = inner.state.lock();
            if !state.active {
                break;
            }
            if state.dispatching {
                continue;
            }
            let item = state
                .high
                .pop_front()
                .or_else(|| state.low.pop_front());
            if item.is_some() {
                state.dispatching = true;
                state.last_dispatch = Some(Instant::now());
            }
            item
        };

        let Some(item) = item else {
            continue;
        };

        debug!(
            priority = ?item.priority,
            queued_ms = item.enqueued_at.elapsed().as_millis() as u64,
            "dispatching request"
        );
        item.job.await;

        inner.state.lock().dispatching = false;
        inner.notify.notify_one();
    }
    debug!("request queue worker exited");
}
