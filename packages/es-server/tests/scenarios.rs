//! End-to-end scenario tests driving the built `axum::Router` over HTTP
//! requests (via `tower::ServiceExt::oneshot`), covering the concrete
//! scenarios from spec.md §8 that the unit tests in `evaluation_server.rs`
//! don't already exercise directly.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use job_core::{Address, Job, JobDispatcher, JobQueue, MockWorkerClient, Priority, WorkerClient, WorkerId, WorkerPool};
use serde_json::json;
use tower::ServiceExt;

use es_server::evaluation_server::EvaluationServer;
use es_server::scorer::{InMemoryRankingView, InMemoryScorer};
use es_server::store::{InMemoryStore, Submission};

struct Harness {
    router: axum::Router,
    queue: Arc<JobQueue>,
    pool: Arc<WorkerPool>,
    dispatcher: Arc<JobDispatcher>,
    mock: Arc<MockWorkerClient>,
    store: Arc<InMemoryStore>,
}

fn harness() -> Harness {
    let queue = Arc::new(JobQueue::new());
    let pool = Arc::new(WorkerPool::new());
    let mock = Arc::new(MockWorkerClient::default());
    let client: Arc<dyn WorkerClient> = mock.clone();
    let dispatcher = Arc::new(JobDispatcher::new(queue.clone(), pool.clone(), client));
    let store = Arc::new(InMemoryStore::new());
    let scorer = Arc::new(InMemoryScorer::new());
    let view = Arc::new(InMemoryRankingView::new());
    let es = Arc::new(EvaluationServer::new(pool.clone(), dispatcher.clone(), store.clone(), scorer, view));
    let router = es_server::rpc::router(es);
    Harness {
        router,
        queue,
        pool,
        dispatcher,
        mock,
        store,
    }
}

async fn post(router: &axum::Router, path: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let request = Request::post(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn addr(port: u16) -> Address {
    Address {
        host: "127.0.0.1".into(),
        port,
    }
}

/// Scenario 2: token bump races an un-tokened submission's evaluation and
/// must come out ahead once bumped to MEDIUM.
#[tokio::test]
async fn token_bump_preempts_lower_priority_evaluation() {
    let h = harness();
    h.store.insert(Submission::new("s1", "task-a"));
    h.store.insert(Submission::new("s2", "task-a"));

    // Both evaluations land at LOW simultaneously (as if compilation just
    // finished for each with no token spent yet).
    h.queue.push(Job::Evaluate("s1".into()), Priority::Low);
    h.queue.push(Job::Evaluate("s2".into()), Priority::Low);

    let (status, _) = post(&h.router, "/rpc/use_token", json!({ "submission_id": "s1" })).await;
    assert_eq!(status, StatusCode::OK);

    let top = h.queue.top().unwrap();
    assert_eq!(top.job, Job::Evaluate("s1".into()), "tokened submission must be dispatched first");
    assert_eq!(top.priority, Priority::Medium);
}

/// Scenario 3: a worker that rejects its compile RPC is disabled and the
/// job is retried against another worker. Only one worker is registered at
/// a time so which one `acquire_worker` would have picked first (the pool
/// makes no ordering guarantee among equivalent INACTIVE workers, per
/// spec.md §5) can't make this flaky.
#[tokio::test]
async fn worker_crash_disables_it_and_retries_on_another() {
    let h = harness();
    h.store.insert(Submission::new("s1", "task-a"));
    h.pool.add_worker(WorkerId(0), addr(9000)).unwrap();
    h.mock.fail_port(9000);

    let (status, _) = post(&h.router, "/rpc/add_job", json!({ "submission_id": "s1" })).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(h.dispatcher.step().await, job_core::DispatchOutcome::WorkerRejected);
    assert_eq!(h.mock.compile_calls.lock().unwrap().len(), 0);
    // Worker 0 must have landed on Disabled: del_worker only succeeds from there.
    h.pool.del_worker(WorkerId(0)).unwrap();

    let (status, _) = post(&h.router, "/rpc/add_worker", json!({ "n": 1, "host": "127.0.0.1", "port": 9001 })).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(h.dispatcher.step().await, job_core::DispatchOutcome::Dispatched);
    assert_eq!(h.pool.working_workers(), 1);
    assert_eq!(h.mock.compile_calls.lock().unwrap().len(), 1);

    let (_, body) = post(&h.router, "/rpc/get_workers_status", json!({})).await;
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1, "worker 0 was removed by del_worker above");
    assert_eq!(entries[0]["worker_id"], 1);
}

/// Scenario 6: the bomb blocks new dispatch but lets the in-flight job
/// finish, then the process is ready to exit once the worker drains.
#[tokio::test]
async fn bomb_drains_in_flight_job_before_exploding() {
    let h = harness();
    let mut s1 = Submission::new("s1", "task-a");
    h.store.insert(s1.clone());
    h.pool.add_worker(WorkerId(0), addr(9000)).unwrap();

    post(&h.router, "/rpc/add_job", json!({ "submission_id": "s1" })).await;
    assert_eq!(h.dispatcher.step().await, job_core::DispatchOutcome::Dispatched);
    assert_eq!(h.pool.working_workers(), 1);

    let (status, _) = post(&h.router, "/rpc/self_destruct", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.dispatcher.step().await, job_core::DispatchOutcome::BombAtHead);
    assert!(!h.dispatcher.should_explode(), "worker 0 is still busy on s1");

    // Compilation finishes successfully while the bomb is primed.
    s1.compilation_outcome = Some(es_server::store::Outcome::Ok);
    h.store.insert(s1);
    let (status, _) = post(
        &h.router,
        "/rpc/compilation_finished",
        json!({ "success": true, "submission_id": "s1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert!(h.dispatcher.should_explode(), "worker has drained, bomb should now be ready to explode");
    // The newly-queued evaluation must never be dispatched: the bomb sits
    // permanently at the head once primed.
    assert_eq!(h.dispatcher.step().await, job_core::DispatchOutcome::BombAtHead);
    assert_eq!(h.pool.working_workers(), 0);
}
