//! Core data types shared by the queue, pool, and dispatcher.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier for a contestant submission.
///
/// The scheduler never interprets this value; it only compares it for
/// equality when matching a job to a worker or a queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub String);

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SubmissionId {
    fn from(s: String) -> Self {
        SubmissionId(s)
    }
}

impl From<&str> for SubmissionId {
    fn from(s: &str) -> Self {
        SubmissionId(s.to_string())
    }
}

/// Five-level scheduling priority. Lower variants are served first.
///
/// `Ord` follows declaration order, which is what [`QueueEntry`] relies on
/// to keep the heap a proper min-heap under `(priority, timestamp)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    ExtraHigh,
    High,
    Medium,
    Low,
    ExtraLow,
}

/// The kind of work a [`Job`] carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Job {
    Compile(SubmissionId),
    Evaluate(SubmissionId),
    /// Sentinel job: once reached at the queue head it blocks all further
    /// dispatch and triggers process exit once every worker is idle.
    Bomb,
}

impl Job {
    /// Structural identity used for `find_worker`/`set_priority` lookups:
    /// two jobs are "the same job" if they carry the same kind and
    /// submission id, regardless of any other state.
    pub fn matches(&self, other: &Job) -> bool {
        self == other
    }

    pub fn submission_id(&self) -> Option<&SubmissionId> {
        match self {
            Job::Compile(id) | Job::Evaluate(id) => Some(id),
            Job::Bomb => None,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Compile(id) => write!(f, "compile({id})"),
            Job::Evaluate(id) => write!(f, "evaluate({id})"),
            Job::Bomb => write!(f, "bomb"),
        }
    }
}

/// The queue's sort key: `(priority, timestamp)`, ascending.
///
/// Ties break on timestamp (older first) rather than being left
/// unspecified, so that two jobs queued at the same priority are served
/// in FIFO order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    pub job: Job,
}

impl QueueEntry {
    pub fn new(job: Job, priority: Priority, timestamp: DateTime<Utc>) -> Self {
        Self {
            priority,
            timestamp,
            job,
        }
    }

    /// The `(priority, timestamp)` pair captured as a worker's side data
    /// when it is handed this entry, so a revoked lease can reconstruct
    /// the original entry exactly.
    pub fn side_data(&self) -> SideData {
        SideData {
            priority: self.priority,
            timestamp: self.timestamp,
        }
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.timestamp).cmp(&(other.priority, other.timestamp))
    }
}

/// The `(priority, timestamp)` of the job a worker currently holds,
/// recorded at acquire time so the lease can be revoked later and the
/// queue entry rebuilt faithfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideData {
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
}

/// Identifier of a worker in the pool. Stable for the process lifetime;
/// assigned by the caller of `add_worker` (the configured index, in the
/// reference deployment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network endpoint of a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
