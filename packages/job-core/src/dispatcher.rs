//! The scheduler's main event loop.
//!
//! [`JobDispatcher`] owns no collection of its own — the queue and the pool
//! each guard their own invariants — only a "touched" wake latch and the
//! bomb-primed flag. Every operation that can make the head of the queue
//! dispatchable again (a push, a priority change, a worker release or
//! enable) goes through one of the wrapper methods here, which perform the
//! mutation and then arm the latch.
//!
//! The latch is a plain [`tokio::sync::Notify`] rather than a hand-rolled
//! "atomic wait-and-clear" flag. `Notify::notify_one` buffers a single
//! permit for the next `notified().await` even when nothing is currently
//! waiting, which is exactly what keeps a touch arriving mid-`process_queue`
//! from being lost — the race a flag-plus-condvar scheme has to get right
//! by hand, and doesn't always.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{debug, info, warn};

use crate::error::{Result, SchedulerError};
use crate::pool::WorkerPool;
use crate::queue::JobQueue;
use crate::types::{Address, Job, Priority, QueueEntry, SideData, WorkerId};
use crate::worker_client::WorkerClient;

/// What happened on one trip through [`JobDispatcher::process_queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The queue was empty.
    Idle,
    /// The head of the queue is a bomb; it stays there until every worker
    /// has drained.
    BombAtHead,
    /// The job at the head needs a worker and none is free right now.
    NoWorkerAvailable,
    /// The head job was handed to a worker and popped.
    Dispatched,
    /// The worker picked for the head job rejected the RPC; it has been
    /// disabled and the job is still at the head for the next pass to
    /// retry against a different worker.
    WorkerRejected,
}

/// Owns the wake latch and bomb flag; the queue, pool and RPC client are
/// shared with the rest of the process via `Arc`.
pub struct JobDispatcher {
    queue: Arc<JobQueue>,
    pool: Arc<WorkerPool>,
    worker_client: Arc<dyn WorkerClient>,
    touched: Notify,
    bomb_primed: AtomicBool,
    /// Serializes `process_queue` against itself. There is meant to be
    /// exactly one `run_until_explosion` loop per dispatcher; this exists
    /// so tests can call `step` directly without risking two passes
    /// interleaving their queue-head reads.
    process_lock: AsyncMutex<()>,
}

impl JobDispatcher {
    pub fn new(queue: Arc<JobQueue>, pool: Arc<WorkerPool>, worker_client: Arc<dyn WorkerClient>) -> Self {
        Self {
            queue,
            pool,
            worker_client,
            touched: Notify::new(),
            bomb_primed: AtomicBool::new(false),
            process_lock: AsyncMutex::new(()),
        }
    }

    pub fn bomb_primed(&self) -> bool {
        self.bomb_primed.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.touched.notify_one();
    }

    // ---- mutation wrappers: mutate, then arm the latch ----

    pub fn queue_push(&self, job: Job, priority: Priority) {
        self.queue.push(job, priority);
        self.touch();
    }

    pub fn queue_push_entry(&self, entry: QueueEntry) {
        self.queue.push_entry(entry);
        self.touch();
    }

    pub fn queue_set_priority(&self, job: &Job, priority: Priority) -> Result<()> {
        self.queue.set_priority(job, priority)?;
        self.touch();
        Ok(())
    }

    pub fn release_worker(&self, id: WorkerId) -> Result<SideData> {
        let side_data = self.pool.release_worker(id)?;
        self.touch();
        Ok(side_data)
    }

    pub fn enable_worker(&self, id: WorkerId) -> Result<()> {
        self.pool.enable_worker(id)?;
        self.touch();
        Ok(())
    }

    pub fn add_worker(&self, id: WorkerId, address: Address) -> Result<()> {
        self.pool.add_worker(id, address)?;
        self.touch();
        Ok(())
    }

    /// Does not touch the latch: removing a disabled worker can never make
    /// the queue head dispatchable.
    pub fn del_worker(&self, id: WorkerId) -> Result<()> {
        self.pool.del_worker(id)
    }

    pub fn disable_worker(&self, id: WorkerId) -> Result<()> {
        self.pool.disable_worker(id)
    }

    /// Wait for the dispatcher to be touched.
    pub async fn wait_for_work(&self) {
        self.touched.notified().await;
    }

    /// Whether the process should exit now: the bomb has been primed and
    /// every worker has drained.
    pub fn should_explode(&self) -> bool {
        self.bomb_primed() && self.pool.working_workers() == 0
    }

    /// Run one `process_queue` pass under the process lock.
    pub async fn step(&self) -> DispatchOutcome {
        let _guard = self.process_lock.lock().await;
        self.process_queue().await
    }

    async fn process_queue(&self) -> DispatchOutcome {
        let entry = match self.queue.top() {
            Ok(entry) => entry,
            Err(SchedulerError::EmptyQueue) => return DispatchOutcome::Idle,
            Err(e) => {
                warn!(error = %e, "dispatcher: unexpected error reading queue head");
                return DispatchOutcome::Idle;
            }
        };

        if entry.job == Job::Bomb {
            if !self.bomb_primed.swap(true, Ordering::SeqCst) {
                info!("dispatcher: bomb reached the head of the queue, priming shutdown");
                // Re-arm so a waiting run loop immediately re-checks
                // should_explode instead of blocking for another touch.
                self.touch();
            }
            return DispatchOutcome::BombAtHead;
        }

        let side_data = entry.side_data();
        let acquired = match self.pool.acquire_worker(entry.job.clone(), false, side_data).await {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(error = %e, "dispatcher: worker pool error while acquiring");
                return DispatchOutcome::NoWorkerAvailable;
            }
        };

        let worker_id = match acquired {
            Some(id) => id,
            None => return DispatchOutcome::NoWorkerAvailable,
        };

        let address = match self.pool.address_of(worker_id) {
            Ok(address) => address,
            Err(e) => {
                warn!(worker = %worker_id, error = %e, "dispatcher: worker vanished right after acquire");
                return DispatchOutcome::NoWorkerAvailable;
            }
        };

        let rpc_result = match &entry.job {
            Job::Compile(id) => self.worker_client.compile(&address, id).await,
            Job::Evaluate(id) => self.worker_client.evaluate(&address, id).await,
            Job::Bomb => unreachable!("bomb handled above"),
        };

        match rpc_result {
            Ok(()) => {
                match self.queue.try_pop() {
                    Ok(popped) => debug_assert_eq!(popped.job, entry.job, "dispatcher popped the wrong entry"),
                    Err(e) => warn!(error = %e, "dispatcher: queue head vanished after successful dispatch"),
                }
                debug!(worker = %worker_id, job = %entry.job, "dispatcher: dispatched job");
                DispatchOutcome::Dispatched
            }
            Err(err) => {
                warn!(worker = %worker_id, job = %entry.job, error = %err, "dispatcher: worker rejected job, disabling it");
                if let Err(e) = self.pool.increment_error_count(worker_id) {
                    warn!(worker = %worker_id, error = %e, "dispatcher: failed to record error count");
                }
                if let Err(e) = self.pool.release_worker(worker_id) {
                    warn!(worker = %worker_id, error = %e, "dispatcher: failed to release rejected worker");
                }
                if let Err(e) = self.pool.disable_worker(worker_id) {
                    warn!(worker = %worker_id, error = %e, "dispatcher: failed to disable rejected worker");
                }
                // Job stays at the head; the next pass retries it against
                // whatever worker is inactive now.
                DispatchOutcome::WorkerRejected
            }
        }
    }

    /// Drive the dispatcher until the bomb has been primed and every
    /// worker has drained, then return. The caller (`main`) is expected to
    /// exit the process on return.
    pub async fn run_until_explosion(self: Arc<Self>) {
        loop {
            self.wait_for_work().await;
            loop {
                if self.should_explode() {
                    info!("dispatcher: bomb primed and all workers drained, stopping");
                    return;
                }
                match self.step().await {
                    DispatchOutcome::Dispatched | DispatchOutcome::WorkerRejected => continue,
                    DispatchOutcome::Idle | DispatchOutcome::NoWorkerAvailable | DispatchOutcome::BombAtHead => break,
                }
            }
        }
    }
}
