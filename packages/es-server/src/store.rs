//! The submission persistence layer, kept at arm's length as a trait.
//!
//! `spec.md` treats the document store as an external collaborator
//! (`load(id)`, `save(obj)` with optimistic-concurrency conflict retry,
//! `refresh(obj)`); this module defines that contract and ships an
//! in-memory implementation for tests and standalone operation. A real
//! deployment is expected to bring its own `SubmissionStore` against
//! whatever document store it actually runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use job_core::SubmissionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `compile`/`evaluate` outcome as reported back by a Worker. Absent until
/// the first `*_finished` RPC lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Ok,
    Fail,
}

/// A contestant submission, as described (but left opaque) in spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub task_id: String,
    pub compilation_tentatives: u32,
    pub evaluation_tentatives: u32,
    pub compilation_outcome: Option<Outcome>,
    pub evaluation_outcome: Option<Outcome>,
    pub timestamp: DateTime<Utc>,
    pub tokened: bool,
    /// Optimistic-concurrency version, bumped on every successful `save`.
    /// `save` fails with `StoreError::Conflict` if the caller's version is
    /// stale; `refresh` reloads to the current version.
    pub version: u64,
}

impl Submission {
    pub fn new(id: impl Into<SubmissionId>, task_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.into(),
            compilation_tentatives: 0,
            evaluation_tentatives: 0,
            compilation_outcome: None,
            evaluation_outcome: None,
            timestamp: Utc::now(),
            tokened: false,
            version: 0,
        }
    }

    /// Whether the contestant has elected detailed (higher-priority)
    /// evaluation for this submission.
    pub fn tokened(&self) -> bool {
        self.tokened
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("submission not found: {0}")]
    NotFound(SubmissionId),
    /// Optimistic-concurrency conflict: another writer saved a newer
    /// version since this copy was loaded or last refreshed.
    #[error("save conflict on submission {0}: refresh and retry")]
    Conflict(SubmissionId),
}

/// The document-store contract spec.md treats as external.
#[async_trait]
pub trait SubmissionStore: Send + Sync + 'static {
    async fn load(&self, id: &SubmissionId) -> Result<Submission, StoreError>;
    async fn save(&self, submission: &mut Submission) -> Result<(), StoreError>;
    async fn refresh(&self, submission: &mut Submission) -> Result<(), StoreError>;
    /// Every known submission id, for the startup re-queue walk.
    async fn all_ids(&self) -> Vec<SubmissionId>;
}

/// Convenience helper implementing the "load -> mutate -> save -> on
/// conflict refresh -> reapply -> retry" loop spec.md's Design Notes call
/// out explicitly, rather than inlining it at every call site.
pub async fn save_with_retry<S, F>(store: &S, submission: &mut Submission, mut mutate: F) -> Result<(), StoreError>
where
    S: SubmissionStore + ?Sized,
    F: FnMut(&mut Submission),
{
    loop {
        mutate(submission);
        match store.save(submission).await {
            Ok(()) => return Ok(()),
            Err(StoreError::Conflict(_)) => {
                store.refresh(submission).await?;
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

/// In-memory `SubmissionStore`, a `Mutex<HashMap<..>>` standing in for the
/// real document store. Good enough for tests and for running the server
/// standalone without an external dependency.
#[derive(Default)]
pub struct InMemoryStore {
    submissions: Mutex<HashMap<SubmissionId, Submission>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a submission directly (tests, and pre-loading contest data).
    pub fn insert(&self, submission: Submission) {
        self.submissions
            .lock()
            .expect("store mutex poisoned")
            .insert(submission.id.clone(), submission);
    }
}

#[async_trait]
impl SubmissionStore for InMemoryStore {
    async fn load(&self, id: &SubmissionId) -> Result<Submission, StoreError> {
        self.submissions
            .lock()
            .expect("store mutex poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn save(&self, submission: &mut Submission) -> Result<(), StoreError> {
        let mut submissions = self.submissions.lock().expect("store mutex poisoned");
        match submissions.get(&submission.id) {
            Some(current) if current.version != submission.version => {
                Err(StoreError::Conflict(submission.id.clone()))
            }
            _ => {
                submission.version += 1;
                submissions.insert(submission.id.clone(), submission.clone());
                Ok(())
            }
        }
    }

    async fn refresh(&self, submission: &mut Submission) -> Result<(), StoreError> {
        let current = self.load(&submission.id).await?;
        *submission = current;
        Ok(())
    }

    async fn all_ids(&self) -> Vec<SubmissionId> {
        self.submissions.lock().expect("store mutex poisoned").keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_missing_fails() {
        let store = InMemoryStore::new();
        let err = store.load(&SubmissionId::from("s1")).await;
        assert!(matches!(err, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let store = InMemoryStore::new();
        let mut s = Submission::new("s1", "task-a");
        store.save(&mut s).await.unwrap();
        assert_eq!(s.version, 1);

        let loaded = store.load(&SubmissionId::from("s1")).await.unwrap();
        assert_eq!(loaded.task_id, "task-a");
    }

    #[tokio::test]
    async fn stale_save_conflicts_and_refresh_recovers() {
        let store = InMemoryStore::new();
        let mut writer_a = Submission::new("s1", "task-a");
        store.save(&mut writer_a).await.unwrap();

        let mut writer_b = writer_a.clone();
        writer_a.compilation_tentatives += 1;
        store.save(&mut writer_a).await.unwrap();

        writer_b.evaluation_tentatives += 1;
        let err = store.save(&mut writer_b).await;
        assert!(matches!(err, Err(StoreError::Conflict(_))));

        store.refresh(&mut writer_b).await.unwrap();
        assert_eq!(writer_b.compilation_tentatives, 1);
    }

    #[tokio::test]
    async fn save_with_retry_reapplies_mutation_after_conflict() {
        let store = InMemoryStore::new();
        let mut seed = Submission::new("s1", "task-a");
        store.save(&mut seed).await.unwrap();

        let mut stale = seed.clone();
        // Someone else saves first, bumping the version underneath `stale`.
        let mut racer = seed.clone();
        racer.evaluation_tentatives = 5;
        store.save(&mut racer).await.unwrap();

        save_with_retry(&store, &mut stale, |s| s.compilation_tentatives += 1)
            .await
            .unwrap();

        let final_state = store.load(&SubmissionId::from("s1")).await.unwrap();
        assert_eq!(final_state.compilation_tentatives, 1);
        assert_eq!(final_state.evaluation_tentatives, 5, "racer's write must survive the refresh-and-reapply");
    }
}
