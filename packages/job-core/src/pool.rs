//! Registry and lifecycle of remote Workers.
//!
//! [`WorkerPool`] keeps one [`WorkerRecord`] per registered worker and a
//! counting semaphore whose value always equals the number of `Inactive`
//! workers (invariant W1). Every operation that reads or writes more than
//! one field of a record, or scans the map for an `Inactive` worker, holds
//! the pool's single lock for the duration — the map and the semaphore are
//! never allowed to drift apart, which is the exact desync the reference
//! implementation's separately-synchronized fields are prone to.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{Result, SchedulerError};
use crate::types::{Address, Job, QueueEntry, SideData, WorkerId};

/// The three mutually-exclusive states a worker can be in (invariant W2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Inactive,
    Disabled,
    Busy(Job),
}

impl WorkerState {
    fn label(&self) -> &'static str {
        match self {
            WorkerState::Inactive => "inactive",
            WorkerState::Disabled => "disabled",
            WorkerState::Busy(_) => "busy",
        }
    }
}

/// Per-worker bookkeeping. Not exposed mutably outside the pool; all
/// mutation goes through `WorkerPool` methods so the availability
/// semaphore can never be updated out of step with `state`.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub state: WorkerState,
    pub address: Address,
    /// Wall time the current lease began; `Some` iff `state` is `Busy`
    /// (invariant W3).
    pub lease_start: Option<DateTime<Utc>>,
    pub error_count: u32,
    /// `(priority, timestamp)` of the job this worker is busy on, captured
    /// at acquire time so a revoked lease can rebuild the queue entry.
    pub side_data: Option<SideData>,
    /// If set, the next transition out of `Busy` goes to `Disabled`
    /// instead of `Inactive`, and does not credit the availability
    /// semaphore.
    pub schedule_disable: bool,
}

/// A point-in-time snapshot of one worker, as returned by
/// `get_workers_status` to RPC callers.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub job: Option<Job>,
    pub address: Address,
    pub lease_start: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub side_data: Option<(crate::types::Priority, DateTime<Utc>)>,
}

pub struct WorkerPool {
    workers: Mutex<HashMap<WorkerId, WorkerRecord>>,
    /// Counts `Inactive` workers; `acquire_worker` blocks or polls on it.
    available: Semaphore,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            available: Semaphore::new(0),
        }
    }

    pub fn add_worker(&self, id: WorkerId, address: Address) -> Result<()> {
        let mut workers = self.workers.lock().expect("worker pool mutex poisoned");
        if workers.contains_key(&id) {
            return Err(SchedulerError::WorkerAlreadyExists(id));
        }
        workers.insert(
            id,
            WorkerRecord {
                state: WorkerState::Inactive,
                address,
                lease_start: None,
                error_count: 0,
                side_data: None,
                schedule_disable: false,
            },
        );
        self.available.add_permits(1);
        debug!(worker = %id, "worker pool: added worker");
        Ok(())
    }

    /// Remove a worker. Only legal from `Disabled`.
    pub fn del_worker(&self, id: WorkerId) -> Result<()> {
        let mut workers = self.workers.lock().expect("worker pool mutex poisoned");
        let record = workers.get(&id).ok_or(SchedulerError::WorkerNotFound(id))?;
        if record.state != WorkerState::Disabled {
            return Err(SchedulerError::InvalidWorkerState {
                worker: id,
                expected: "disabled",
                actual: record.state.label(),
            });
        }
        workers.remove(&id);
        debug!(worker = %id, "worker pool: removed worker");
        Ok(())
    }

    /// `Disabled` -> `Inactive`; credits the availability semaphore.
    pub fn enable_worker(&self, id: WorkerId) -> Result<()> {
        let mut workers = self.workers.lock().expect("worker pool mutex poisoned");
        let record = workers.get_mut(&id).ok_or(SchedulerError::WorkerNotFound(id))?;
        if record.state != WorkerState::Disabled {
            return Err(SchedulerError::InvalidWorkerState {
                worker: id,
                expected: "disabled",
                actual: record.state.label(),
            });
        }
        record.state = WorkerState::Inactive;
        record.schedule_disable = false;
        self.available.add_permits(1);
        debug!(worker = %id, "worker pool: enabled worker");
        Ok(())
    }

    /// `Inactive` -> `Disabled`; consumes one permit from the availability
    /// semaphore non-blockingly. Fails if no `Inactive` worker is available
    /// right now (the caller is expected to retry later — typically this
    /// is only called on a worker that is itself `Inactive`, in which case
    /// it always succeeds).
    pub fn disable_worker(&self, id: WorkerId) -> Result<()> {
        let mut workers = self.workers.lock().expect("worker pool mutex poisoned");
        let record = workers.get_mut(&id).ok_or(SchedulerError::WorkerNotFound(id))?;
        match record.state {
            WorkerState::Inactive => {
                self.available
                    .try_acquire()
                    .map_err(|_| SchedulerError::Corruption("available semaphore underflowed disable"))?
                    .forget();
                record.state = WorkerState::Disabled;
                debug!(worker = %id, "worker pool: disabled worker");
                Ok(())
            }
            WorkerState::Disabled => Ok(()),
            WorkerState::Busy(_) => {
                // Defer: the worker will flip to Disabled on its next release.
                record.schedule_disable = true;
                Ok(())
            }
        }
    }

    /// Attempt to assign `job` to an `Inactive` worker, blocking or polling
    /// the availability semaphore as requested.
    ///
    /// Returns `None` only in non-blocking mode when no worker is free.
    pub async fn acquire_worker(
        &self,
        job: Job,
        blocking: bool,
        side_data: SideData,
    ) -> Result<Option<WorkerId>> {
        if blocking {
            self.available
                .acquire()
                .await
                .expect("available semaphore closed")
                .forget();
        } else if self.available.try_acquire().map(|p| p.forget()).is_err() {
            return Ok(None);
        }

        let mut workers = self.workers.lock().expect("worker pool mutex poisoned");
        let (id, record) = workers
            .iter_mut()
            .find(|(_, r)| r.state == WorkerState::Inactive)
            .ok_or(SchedulerError::Corruption(
                "available semaphore granted a permit but no worker is inactive",
            ))?;
        let id = *id;
        record.state = WorkerState::Busy(job);
        record.lease_start = Some(Utc::now());
        record.side_data = Some(side_data);
        debug!(worker = %id, "worker pool: acquired worker");
        Ok(Some(id))
    }

    /// Release a worker from `Busy`. Transitions to `Disabled` if
    /// `schedule_disable` was set, otherwise to `Inactive` (crediting the
    /// availability semaphore). Returns the side data that was recorded at
    /// acquire time.
    pub fn release_worker(&self, id: WorkerId) -> Result<SideData> {
        let mut workers = self.workers.lock().expect("worker pool mutex poisoned");
        let record = workers.get_mut(&id).ok_or(SchedulerError::WorkerNotFound(id))?;
        if !matches!(record.state, WorkerState::Busy(_)) {
            return Err(SchedulerError::InvalidWorkerState {
                worker: id,
                expected: "busy",
                actual: record.state.label(),
            });
        }
        let side_data = record
            .side_data
            .take()
            .expect("busy worker must carry side data (invariant)");
        record.lease_start = None;

        if record.schedule_disable {
            record.state = WorkerState::Disabled;
            record.schedule_disable = false;
        } else {
            record.state = WorkerState::Inactive;
            self.available.add_permits(1);
        }
        debug!(worker = %id, "worker pool: released worker");
        Ok(side_data)
    }

    /// Find the worker currently busy on a structurally-equal job.
    pub fn find_worker(&self, job: &Job) -> Result<WorkerId> {
        let workers = self.workers.lock().expect("worker pool mutex poisoned");
        workers
            .iter()
            .find(|(_, r)| matches!(&r.state, WorkerState::Busy(j) if j.matches(job)))
            .map(|(id, _)| *id)
            .ok_or_else(|| SchedulerError::JobNotAssigned(job.clone()))
    }

    pub fn working_workers(&self) -> usize {
        let workers = self.workers.lock().expect("worker pool mutex poisoned");
        workers
            .values()
            .filter(|r| matches!(r.state, WorkerState::Busy(_)))
            .count()
    }

    pub fn get_workers_status(&self) -> HashMap<WorkerId, WorkerStatus> {
        let workers = self.workers.lock().expect("worker pool mutex poisoned");
        workers
            .iter()
            .map(|(id, r)| {
                let job = match &r.state {
                    WorkerState::Busy(job) => Some(job.clone()),
                    _ => None,
                };
                (
                    *id,
                    WorkerStatus {
                        job,
                        address: r.address.clone(),
                        lease_start: r.lease_start,
                        error_count: r.error_count,
                        side_data: r.side_data.map(|sd| (sd.priority, sd.timestamp)),
                    },
                )
            })
            .collect()
    }

    pub fn address_of(&self, id: WorkerId) -> Result<Address> {
        let workers = self.workers.lock().expect("worker pool mutex poisoned");
        workers
            .get(&id)
            .map(|r| r.address.clone())
            .ok_or(SchedulerError::WorkerNotFound(id))
    }

    pub fn increment_error_count(&self, id: WorkerId) -> Result<u32> {
        let mut workers = self.workers.lock().expect("worker pool mutex poisoned");
        let record = workers.get_mut(&id).ok_or(SchedulerError::WorkerNotFound(id))?;
        record.error_count += 1;
        Ok(record.error_count)
    }

    /// Reclaim workers that have held their lease past `timeout`.
    ///
    /// For each over-budget worker: set `schedule_disable`, release it
    /// (which therefore lands on `Disabled` rather than crediting the
    /// semaphore), and return a reconstructed [`QueueEntry`] for the
    /// caller to re-push. The ordering (schedule-disable *then* release)
    /// is load-bearing: reversing it would momentarily grant a phantom
    /// permit to the availability semaphore.
    pub fn check_timeout(&self, timeout: chrono::Duration) -> Vec<(WorkerId, QueueEntry, Address)> {
        let now = Utc::now();
        // Capture (id, job, address) for every over-budget worker and flip
        // schedule_disable, all under one lock so nothing else can release
        // or re-acquire the worker between detection and the flag being set.
        let mut timed_out: Vec<(WorkerId, Job, Address)> = Vec::new();
        {
            let mut workers = self.workers.lock().expect("worker pool mutex poisoned");
            for (id, record) in workers.iter_mut() {
                if let (WorkerState::Busy(job), Some(start)) = (&record.state, record.lease_start) {
                    if now - start > timeout {
                        record.schedule_disable = true;
                        timed_out.push((*id, job.clone(), record.address.clone()));
                    }
                }
            }
        }

        let mut reclaimed = Vec::new();
        for (id, job, address) in timed_out {
            match self.release_worker(id) {
                Ok(side_data) => {
                    warn!(worker = %id, "worker pool: lease timed out, worker disabled");
                    let entry = QueueEntry::new(job, side_data.priority, side_data.timestamp);
                    reclaimed.push((id, entry, address));
                }
                Err(e) => {
                    warn!(worker = %id, error = %e, "worker pool: failed to release timed-out worker");
                }
            }
        }
        reclaimed
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}
