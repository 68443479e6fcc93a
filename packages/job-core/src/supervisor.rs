//! Background activity that reclaims jobs from workers whose lease has
//! expired.
//!
//! Structurally this mirrors a poll-loop worker: sleep, scan, act, repeat,
//! with an `AtomicBool` shutdown flag and a `run_until_shutdown` helper
//! that also listens for Ctrl+C — the same shape used elsewhere in this
//! codebase for background job processing, just pointed at in-memory
//! worker leases instead of a database queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tracing::{debug, info, warn};

use crate::pool::WorkerPool;
use crate::worker_client::WorkerClient;

/// Periodically scans the [`WorkerPool`] for leases older than
/// `worker_timeout` and reclaims them.
pub struct TimeoutSupervisor {
    pool: Arc<WorkerPool>,
    worker_client: Arc<dyn WorkerClient>,
    check_period: Duration,
    worker_timeout: ChronoDuration,
    shutdown: Arc<AtomicBool>,
}

/// A job reclaimed from a worker whose lease expired, ready to be
/// re-pushed onto the [`crate::queue::JobQueue`] by the caller.
pub struct ReclaimedJob {
    pub entry: crate::types::QueueEntry,
}

impl TimeoutSupervisor {
    pub fn new(
        pool: Arc<WorkerPool>,
        worker_client: Arc<dyn WorkerClient>,
        check_period: Duration,
        worker_timeout: ChronoDuration,
    ) -> Self {
        Self {
            pool,
            worker_client,
            check_period,
            worker_timeout,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run one scan-and-reclaim pass. Exposed separately from [`Self::run`]
    /// so tests can drive it deterministically without sleeping.
    pub async fn check_once(&self) -> Vec<ReclaimedJob> {
        let reclaimed = self.pool.check_timeout(self.worker_timeout);
        let mut out = Vec::with_capacity(reclaimed.len());
        for (id, entry, address) in reclaimed {
            debug!(worker = %id, job = %entry.job, "supervisor: reclaiming timed-out lease");
            // Best-effort: the worker is presumed gone, so any failure here
            // is swallowed rather than propagated.
            if let Err(e) = self.worker_client.shut_down(&address, "lease timeout").await {
                debug!(worker = %id, error = %e, "supervisor: best-effort shutdown failed");
            }
            out.push(ReclaimedJob { entry });
        }
        out
    }

    /// Run until shutdown is requested, calling `on_reclaim` for each batch
    /// of jobs recovered from a timed-out worker. `on_reclaim` is expected
    /// to re-push the entries onto the job queue and wake the dispatcher.
    pub async fn run<F>(self, mut on_reclaim: F)
    where
        F: FnMut(Vec<ReclaimedJob>) + Send,
    {
        info!(
            period_secs = self.check_period.as_secs(),
            timeout_secs = self.worker_timeout.num_seconds(),
            "timeout supervisor starting"
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            tokio::time::sleep(self.check_period).await;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let reclaimed = self.check_once().await;
            if !reclaimed.is_empty() {
                warn!(count = reclaimed.len(), "timeout supervisor: reclaimed timed-out jobs");
                on_reclaim(reclaimed);
            }
        }

        info!("timeout supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, Job, Priority, SideData, WorkerId};
    use crate::worker_client::MockWorkerClient;
    use std::sync::Arc;

    #[tokio::test]
    async fn check_once_reclaims_expired_lease() {
        let pool = Arc::new(WorkerPool::new());
        pool.add_worker(
            WorkerId(0),
            Address {
                host: "127.0.0.1".into(),
                port: 9000,
            },
        )
        .unwrap();

        let side_data = SideData {
            priority: Priority::High,
            timestamp: chrono::Utc::now(),
        };
        pool.acquire_worker(Job::Compile("s1".into()), false, side_data)
            .await
            .unwrap();

        let client: Arc<dyn WorkerClient> = Arc::new(MockWorkerClient::default());
        let supervisor = TimeoutSupervisor::new(
            pool.clone(),
            client.clone(),
            Duration::from_secs(1),
            ChronoDuration::seconds(-1), // already expired
        );

        let reclaimed = supervisor.check_once().await;
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].entry.job, Job::Compile("s1".into()));
        assert_eq!(reclaimed[0].entry.priority, Priority::High);
        assert_eq!(pool.working_workers(), 0);

        let mock = client.as_any().downcast_ref::<MockWorkerClient>().unwrap();
        assert_eq!(mock.shut_down_calls(), 1);
    }

    #[tokio::test]
    async fn check_once_leaves_fresh_leases_alone() {
        let pool = Arc::new(WorkerPool::new());
        pool.add_worker(
            WorkerId(0),
            Address {
                host: "127.0.0.1".into(),
                port: 9000,
            },
        )
        .unwrap();
        let side_data = SideData {
            priority: Priority::Low,
            timestamp: chrono::Utc::now(),
        };
        pool.acquire_worker(Job::Compile("s1".into()), false, side_data)
            .await
            .unwrap();

        let client: Arc<dyn WorkerClient> = Arc::new(MockWorkerClient::default());
        let supervisor = TimeoutSupervisor::new(
            pool.clone(),
            client,
            Duration::from_secs(1),
            ChronoDuration::seconds(3600),
        );

        let reclaimed = supervisor.check_once().await;
        assert!(reclaimed.is_empty());
        assert_eq!(pool.working_workers(), 1);
    }
}
