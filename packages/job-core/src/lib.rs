//! Core scheduling primitives for the evaluation server: a priority job
//! queue, a worker pool, a lease-timeout supervisor, and the dispatcher
//! that ties them together.
//!
//! This crate has no RPC surface of its own — `es-server` owns that — so
//! it can be exercised directly from tests without a network in the loop.

pub mod dispatcher;
pub mod error;
pub mod pool;
pub mod queue;
pub mod supervisor;
pub mod types;
pub mod worker_client;

pub use dispatcher::{DispatchOutcome, JobDispatcher};
pub use error::{Result, SchedulerError};
pub use pool::{WorkerPool, WorkerRecord, WorkerState, WorkerStatus};
pub use queue::JobQueue;
pub use supervisor::{ReclaimedJob, TimeoutSupervisor};
pub use types::{Address, Job, Priority, QueueEntry, SideData, SubmissionId, WorkerId};
pub use worker_client::{HttpWorkerClient, WorkerClient};
#[cfg(any(test, feature = "testing"))]
pub use worker_client::MockWorkerClient;
