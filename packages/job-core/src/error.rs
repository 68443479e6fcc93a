//! Structured error types for the scheduling core.
//!
//! Every fallible operation in [`crate::queue`], [`crate::pool`], and
//! [`crate::dispatcher`] returns [`SchedulerError`] rather than
//! `anyhow::Error`, so callers (RPC handlers in particular) can match on
//! the kind and decide whether to surface it, retry it, or swallow it.

use thiserror::Error;

use crate::types::{Job, WorkerId};

/// Errors raised by the job queue, worker pool, and dispatcher.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `JobQueue::top`/`pop` called on an empty queue in a non-blocking path.
    #[error("job queue is empty")]
    EmptyQueue,

    /// `JobQueue::set_priority`/`search` found no entry matching the job.
    #[error("job not present in queue: {0}")]
    JobNotFound(Job),

    /// `add_worker` called with an id that is already registered.
    #[error("worker {0} already registered")]
    WorkerAlreadyExists(WorkerId),

    /// A worker lookup (`find_worker`, `del_worker`, `enable_worker`, ...)
    /// found no record for the given id.
    #[error("worker {0} not found")]
    WorkerNotFound(WorkerId),

    /// An operation required the worker to be in a specific state
    /// (e.g. `del_worker` requires `Disabled`, `release_worker` requires
    /// `Busy`) and it was not.
    #[error("worker {worker} is {actual}, expected {expected}")]
    InvalidWorkerState {
        worker: WorkerId,
        expected: &'static str,
        actual: &'static str,
    },

    /// No worker was available and the caller asked for a non-blocking
    /// acquire.
    #[error("no worker available")]
    NoWorkerAvailable,

    /// `find_worker` found no worker currently busy on the given job.
    #[error("no worker is busy on job: {0}")]
    JobNotAssigned(Job),

    /// The heap and its non-empty semaphore, or the worker map and its
    /// availability semaphore, have gone out of sync. This should never
    /// happen; it is a corruption signal and the process should not
    /// continue scheduling.
    #[error("scheduler invariant violated: {0}")]
    Corruption(&'static str),
}

impl SchedulerError {
    /// Whether this error should be surfaced to an RPC caller as a request
    /// error, as opposed to being handled internally (retried, logged, or
    /// escalated to a process abort).
    ///
    /// Mirrors the `InvalidOperation` vs. everything-else split from the
    /// error handling design: bad preconditions are the caller's fault and
    /// are reported; corruption is nobody's fault and is fatal.
    pub fn is_invalid_operation(&self) -> bool {
        matches!(
            self,
            SchedulerError::JobNotFound(_)
                | SchedulerError::WorkerAlreadyExists(_)
                | SchedulerError::WorkerNotFound(_)
                | SchedulerError::InvalidWorkerState { .. }
                | SchedulerError::JobNotAssigned(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SchedulerError::Corruption(_))
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_operation_classification() {
        assert!(SchedulerError::WorkerNotFound(WorkerId(1)).is_invalid_operation());
        assert!(!SchedulerError::EmptyQueue.is_invalid_operation());
        assert!(!SchedulerError::Corruption("heap/semaphore desync").is_invalid_operation());
    }

    #[test]
    fn fatal_classification() {
        assert!(SchedulerError::Corruption("x").is_fatal());
        assert!(!SchedulerError::NoWorkerAvailable.is_fatal());
    }
}
