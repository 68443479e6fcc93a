//! Priority queue of pending jobs.
//!
//! [`JobQueue`] is a min-heap under `(priority, timestamp)`, paired with a
//! counting semaphore whose value always equals the heap length (invariant
//! Q2). The semaphore is what makes `pop` a blocking operation without a
//! busy loop; `top`/`push`/`set_priority` only ever touch the heap lock.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::trace;

use crate::error::{Result, SchedulerError};
use crate::types::{Job, Priority, QueueEntry};

/// Priority-ordered queue of pending compile/evaluate/bomb jobs.
///
/// No deduplication is performed: the same job may be pushed twice if a
/// caller isn't careful (retry paths and the timeout supervisor are
/// expected to avoid this themselves).
pub struct JobQueue {
    heap: Mutex<BinaryHeap<Reverse<QueueEntry>>>,
    non_empty: Semaphore,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            non_empty: Semaphore::new(0),
        }
    }

    /// Push a job with an explicit priority and timestamp.
    ///
    /// Prefer [`JobQueue::push`] when the job's natural timestamp (or
    /// "now") is good enough; this exists for retry paths that must
    /// preserve the original `(priority, timestamp)` of a reclaimed entry.
    pub fn push_entry(&self, entry: QueueEntry) {
        trace!(job = %entry.job, priority = ?entry.priority, "job queue: push");
        self.heap.lock().expect("job queue mutex poisoned").push(Reverse(entry));
        self.non_empty.add_permits(1);
    }

    /// Push a job, defaulting the timestamp to now.
    pub fn push(&self, job: Job, priority: Priority) {
        self.push_entry(QueueEntry::new(job, priority, Utc::now()));
    }

    /// Return the minimum entry without removing it.
    pub fn top(&self) -> Result<QueueEntry> {
        let heap = self.heap.lock().expect("job queue mutex poisoned");
        heap.peek()
            .map(|Reverse(entry)| entry.clone())
            .ok_or(SchedulerError::EmptyQueue)
    }

    /// Remove and return the minimum entry, blocking until one is
    /// available.
    ///
    /// Corrupts-and-aborts (per the spec's fatal-corruption contract) if
    /// the semaphore grants access but the heap is empty: that can only
    /// happen if push/pop got out of sync.
    pub async fn pop(&self) -> QueueEntry {
        self.non_empty
            .acquire()
            .await
            .expect("job queue semaphore closed")
            .forget();
        let mut heap = self.heap.lock().expect("job queue mutex poisoned");
        match heap.pop() {
            Some(Reverse(entry)) => entry,
            None => {
                // Never supposed to happen: see SchedulerError::Corruption.
                panic!("job queue went out of sync with its semaphore");
            }
        }
    }

    /// Non-blocking pop: removes and returns the minimum entry only if the
    /// queue is non-empty right now.
    pub fn try_pop(&self) -> Result<QueueEntry> {
        let mut heap = self.heap.lock().expect("job queue mutex poisoned");
        let entry = heap.pop().map(|Reverse(entry)| entry).ok_or(SchedulerError::EmptyQueue)?;
        self.non_empty
            .try_acquire()
            .map_err(|_| SchedulerError::Corruption("non_empty semaphore underflowed pop"))?
            .forget();
        Ok(entry)
    }

    /// Update the priority of the first entry whose job matches
    /// structurally. Fails with [`SchedulerError::JobNotFound`] if absent.
    ///
    /// The reference implementation's `set_priority` has two source bugs
    /// noted for correction here: its `search` helper iterates
    /// `for i in self.queue` and then indexes `self.queue[i]`, which is
    /// not the intended linear scan, and its own `set_priority` writes
    /// `self.queue[pos][0] == priority` (a comparison, not an assignment).
    /// This implementation does the intended thing: find the first
    /// structural match, overwrite its priority, and re-heapify.
    pub fn set_priority(&self, job: &Job, new_priority: Priority) -> Result<()> {
        let mut heap = self.heap.lock().expect("job queue mutex poisoned");
        let mut entries: Vec<QueueEntry> = std::mem::take(&mut *heap)
            .into_iter()
            .map(|Reverse(e)| e)
            .collect();

        let pos = entries
            .iter()
            .position(|e| e.job.matches(job))
            .ok_or_else(|| SchedulerError::JobNotFound(job.clone()))?;
        entries[pos].priority = new_priority;

        *heap = entries.into_iter().map(Reverse).collect();
        Ok(())
    }

    /// Linear search for the queue entry matching a job, without removing
    /// it. Exposed mainly for tests and diagnostics.
    pub fn search(&self, job: &Job) -> Result<QueueEntry> {
        let heap = self.heap.lock().expect("job queue mutex poisoned");
        heap.iter()
            .map(|Reverse(e)| e)
            .find(|e| e.job.matches(job))
            .cloned()
            .ok_or_else(|| SchedulerError::JobNotFound(job.clone()))
    }

    pub fn length(&self) -> usize {
        self.heap.lock().expect("job queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
