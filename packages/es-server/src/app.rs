//! Wires the scheduling core, store/scorer collaborators, and RPC
//! transport into one running service: build the shared state, run the
//! startup walk, spawn the dispatcher and timeout supervisor as background
//! tasks, and hand back the `axum::Router` plus the handles a caller needs
//! to drive a graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::Duration as ChronoDuration;
use job_core::{HttpWorkerClient, JobDispatcher, JobQueue, TimeoutSupervisor, WorkerClient, WorkerPool};
use tracing::info;

use crate::config::Config;
use crate::evaluation_server::EvaluationServer;
use crate::scorer::{RankingView, Scorer};
use crate::store::SubmissionStore;

/// Everything spawned after [`build`] that a graceful shutdown needs to
/// reach: the dispatcher task (to await the bomb's explosion) and the
/// supervisor's shutdown flag.
pub struct RunningServer {
    pub router: Router,
    pub evaluation_server: Arc<EvaluationServer>,
    pub dispatcher: Arc<JobDispatcher>,
    /// The single `run_until_explosion` task spawned by `build`. The
    /// dispatcher's own wake latch assumes exactly one such loop is ever
    /// running; callers must await this handle rather than spawning another.
    pub dispatcher_handle: tokio::task::JoinHandle<()>,
    pub supervisor_shutdown: Arc<std::sync::atomic::AtomicBool>,
}

/// Build the full application: queue, pool (seeded from `config.workers`),
/// dispatcher, supervisor, and the RPC router, then run the startup walk.
pub async fn build(
    config: &Config,
    store: Arc<dyn SubmissionStore>,
    scorer: Arc<dyn Scorer>,
    ranking_view: Arc<dyn RankingView>,
) -> anyhow::Result<RunningServer> {
    let queue = Arc::new(JobQueue::new());
    let pool = Arc::new(WorkerPool::new());
    for (idx, address) in config.workers.iter().enumerate() {
        pool.add_worker(job_core::WorkerId(idx as u32), address.clone())?;
    }
    info!(count = config.workers.len(), "app: registered workers from config");

    let worker_client: Arc<dyn WorkerClient> = Arc::new(HttpWorkerClient::new());
    let dispatcher = Arc::new(JobDispatcher::new(queue.clone(), pool.clone(), worker_client.clone()));

    let evaluation_server = Arc::new(EvaluationServer::new(
        pool.clone(),
        dispatcher.clone(),
        store,
        scorer,
        ranking_view,
    ));
    evaluation_server.bootstrap().await?;

    let dispatcher_handle = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.run_until_explosion().await })
    };

    let supervisor = TimeoutSupervisor::new(
        pool.clone(),
        worker_client,
        Duration::from_secs(config.worker_timeout_check_time_secs),
        ChronoDuration::seconds(config.worker_timeout_secs as i64),
    );
    let supervisor_shutdown = supervisor.shutdown_handle();
    {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            supervisor
                .run(move |reclaimed| {
                    for job in reclaimed {
                        dispatcher.queue_push_entry(job.entry);
                    }
                })
                .await;
        });
    }

    let router = crate::rpc::router(evaluation_server.clone());

    Ok(RunningServer {
        router,
        evaluation_server,
        dispatcher,
        dispatcher_handle,
        supervisor_shutdown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::{InMemoryRankingView, InMemoryScorer};
    use crate::store::InMemoryStore;
    use job_core::Address;

    #[tokio::test]
    async fn build_registers_configured_workers_and_runs_bootstrap() {
        let config = Config {
            bind_host: "127.0.0.1".into(),
            bind_port: 0,
            workers: vec![Address {
                host: "127.0.0.1".into(),
                port: 9000,
            }],
            worker_timeout_secs: 30,
            worker_timeout_check_time_secs: 3600,
        };
        let store = Arc::new(InMemoryStore::new());
        let scorer = Arc::new(InMemoryScorer::new());
        let view = Arc::new(InMemoryRankingView::new());

        let running = build(&config, store, scorer, view).await.unwrap();
        let statuses = running.evaluation_server.get_workers_status();
        assert_eq!(statuses.len(), 1);

        running.supervisor_shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}
