//! Bounded worker pool for per-project invocations.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::stop::StopSignal;
use crate::metrics;

/// Status of a worker pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of jobs currently running.
    pub active_jobs: usize,
    /// Maximum concurrent jobs.
    pub max_concurrent: usize,
    /// Jobs handed to a worker since the pool was created.
    pub total_dispatched: u64,
    /// Jobs that ran to completion.
    pub total_completed: u64,
    /// Jobs whose task panicked.
    pub total_panicked: u64,
}

#[derive(Default)]
struct PoolStats {
    active: AtomicU64,
    total_dispatched: AtomicU64,
    total_completed: AtomicU64,
    total_panicked: AtomicU64,
}

impl PoolStats {
    fn to_status(&self, max_concurrent: usize) -> PoolStatus {
        PoolStatus {
            active_jobs: self.active.load(Ordering::Relaxed) as usize,
            max_concurrent,
            total_dispatched: self.total_dispatched.load(Ordering::Relaxed),
            total_completed: self.total_completed.load(Ordering::Relaxed),
            total_panicked: self.total_panicked.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the active count when a job ends, including by panic.
struct ActiveJob(Arc<PoolStats>);

impl ActiveJob {
    fn start(stats: Arc<PoolStats>) -> Self {
        stats.active.fetch_add(1, Ordering::Relaxed);
        metrics::WORKERS_ACTIVE.inc();
        Self(stats)
    }
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
        metrics::WORKERS_ACTIVE.dec();
    }
}

/// What happened to a batch of items handed to [`BoundedExecutor::execute`].
#[derive(Debug)]
pub struct ExecutionReport<T> {
    /// Outputs of jobs that completed, in completion order.
    pub outputs: Vec<T>,
    /// Items never handed to a worker because a stop was requested.
    pub not_dispatched: usize,
    /// Jobs whose task panicked.
    pub panicked: usize,
    /// Whether dispatch ended early because of a stop request.
    pub stopped: bool,
}

/// Runs jobs on at most `max_workers` tokio tasks at a time.
///
/// Items are dispatched in the order given. A job holds its worker slot
/// until it finishes, so a slow job only ties up its own slot.
pub struct BoundedExecutor {
    max_workers: usize,
    semaphore: Arc<Semaphore>,
    stats: Arc<PoolStats>,
}

impl BoundedExecutor {
    /// Create a pool. `max_workers` must be at least 1.
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            max_workers,
            semaphore: Arc::new(Semaphore::new(max_workers)),
            stats: Arc::new(PoolStats::default()),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn status(&self) -> PoolStatus {
        self.stats.to_status(self.max_workers)
    }

    /// Run `job` for every item and wait for all dispatched jobs to finish.
    ///
    /// Before each dispatch, and while waiting for a free worker, `stop` is
    /// checked; once it is set no further item is dispatched. Jobs already
    /// running are always awaited.
    pub async fn execute<I, F, Fut, T>(
        &self,
        items: Vec<I>,
        stop: &StopSignal,
        job: F,
    ) -> ExecutionReport<T>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let total = items.len();
        let mut dispatched = 0usize;
        let mut stopped = false;
        let mut tasks = JoinSet::new();

        for item in items {
            if stop.is_stop_requested() {
                stopped = true;
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = stop.stopped() => {
                    stopped = true;
                    break;
                }
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            // A stop may have landed while we were waiting for the slot.
            if stop.is_stop_requested() {
                stopped = true;
                break;
            }

            dispatched += 1;
            self.stats.total_dispatched.fetch_add(1, Ordering::Relaxed);
            debug!(dispatched, total, "Dispatching job");

            let active = ActiveJob::start(Arc::clone(&self.stats));
            let stats = Arc::clone(&self.stats);
            let fut = job(item);
            tasks.spawn(async move {
                let _permit = permit;
                let _active = active;
                let output = fut.await;
                stats.total_completed.fetch_add(1, Ordering::Relaxed);
                output
            });
        }

        let not_dispatched = total - dispatched;
        if stopped {
            info!(
                dispatched,
                not_dispatched, "Stop requested, waiting for in-flight jobs"
            );
        }

        let mut outputs = Vec::with_capacity(dispatched);
        let mut panicked = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    panicked += 1;
                    self.stats.total_panicked.fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "Worker task failed");
                }
            }
        }

        ExecutionReport {
            outputs,
            not_dispatched,
            panicked,
            stopped,
        }
    }
}
