//! The scorer and ranking view, the other collaborator spec.md treats as
//! opaque: "an opaque `scorer.add_submission`, `scorer.add_token`,
//! `contest.update_ranking_view`".
//!
//! Both traits are intentionally narrow — the scheduling core only ever
//! needs to notify them, never to read anything back.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::debug;

use crate::store::Submission;

/// Per-task scoring collaborator.
pub trait Scorer: Send + Sync + 'static {
    /// A submission finished evaluation successfully; register its result.
    fn add_submission(&self, submission: &Submission);
    /// A contestant spent a token on `submission`, requesting detailed
    /// (already-computed) results be surfaced.
    fn add_token(&self, submission: &Submission);
}

/// The contest-wide ranking view collaborator.
pub trait RankingView: Send + Sync + 'static {
    /// Recompute/refresh the view after a scoring change.
    fn update(&self, submission: &Submission);
    /// Ensure a ranking view exists for `task_id`, creating one if needed.
    /// Called once per task during the startup walk (spec.md §4.5).
    fn ensure_exists(&self, task_id: &str);
}

/// In-memory scorer: just logs and counts. Stands in for the real
/// per-task scoring engine, which is out of scope for this crate.
#[derive(Default)]
pub struct InMemoryScorer {
    submissions_scored: Mutex<u64>,
    tokens_spent: Mutex<u64>,
}

impl InMemoryScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submissions_scored(&self) -> u64 {
        *self.submissions_scored.lock().expect("scorer mutex poisoned")
    }

    pub fn tokens_spent(&self) -> u64 {
        *self.tokens_spent.lock().expect("scorer mutex poisoned")
    }
}

impl Scorer for InMemoryScorer {
    fn add_submission(&self, submission: &Submission) {
        *self.submissions_scored.lock().expect("scorer mutex poisoned") += 1;
        debug!(submission = %submission.id, "scorer: submission scored");
    }

    fn add_token(&self, submission: &Submission) {
        *self.tokens_spent.lock().expect("scorer mutex poisoned") += 1;
        debug!(submission = %submission.id, "scorer: token redeemed");
    }
}

/// In-memory ranking view, tracking only which tasks have been initialized
/// and how many updates each has seen.
#[derive(Default)]
pub struct InMemoryRankingView {
    known_tasks: Mutex<HashSet<String>>,
    updates: Mutex<u64>,
}

impl InMemoryRankingView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known_task_count(&self) -> usize {
        self.known_tasks.lock().expect("ranking view mutex poisoned").len()
    }

    pub fn update_count(&self) -> u64 {
        *self.updates.lock().expect("ranking view mutex poisoned")
    }
}

impl RankingView for InMemoryRankingView {
    fn update(&self, submission: &Submission) {
        *self.updates.lock().expect("ranking view mutex poisoned") += 1;
        debug!(task = %submission.task_id, "ranking view: updated");
    }

    fn ensure_exists(&self, task_id: &str) {
        self.known_tasks
            .lock()
            .expect("ranking view mutex poisoned")
            .insert(task_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub() -> Submission {
        Submission::new("s1", "task-a")
    }

    #[test]
    fn scorer_counts_submissions_and_tokens() {
        let scorer = InMemoryScorer::new();
        scorer.add_submission(&sub());
        scorer.add_submission(&sub());
        scorer.add_token(&sub());
        assert_eq!(scorer.submissions_scored(), 2);
        assert_eq!(scorer.tokens_spent(), 1);
    }

    #[test]
    fn ranking_view_tracks_known_tasks_and_updates() {
        let view = InMemoryRankingView::new();
        view.ensure_exists("task-a");
        view.ensure_exists("task-a");
        view.ensure_exists("task-b");
        assert_eq!(view.known_task_count(), 2);

        view.update(&sub());
        assert_eq!(view.update_count(), 1);
    }
}
