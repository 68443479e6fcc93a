//! Evaluation Server binary: loads configuration, builds the app, and
//! serves the RPC surface until a bomb explodes or a signal tells it to
//! arm one.

use std::sync::Arc;

use anyhow::{Context, Result};
use es_server::scorer::{InMemoryRankingView, InMemoryScorer};
use es_server::store::InMemoryStore;
use es_server::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,es_server=debug,job_core=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting evaluation server");
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("failed to load configuration")?;

    // The document store and scorer/ranking view are external collaborators
    // (spec.md §1); a real deployment supplies its own `SubmissionStore` and
    // `Scorer`/`RankingView`. The in-memory implementations here let the
    // server run standalone.
    let store = Arc::new(InMemoryStore::new());
    let scorer = Arc::new(InMemoryScorer::new());
    let ranking_view = Arc::new(InMemoryRankingView::new());

    let running = es_server::build(&config, store, scorer, ranking_view).await?;

    let addr = format!("{}:{}", config.bind_host, config.bind_port);
    tracing::info!(%addr, "evaluation server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await.context("failed to bind evaluation server")?;

    let explosion = running.dispatcher_handle;

    let serve = axum::serve(listener, running.router.into_make_service());
    tokio::select! {
        result = serve => {
            result.context("server error")?;
        }
        _ = wait_for_shutdown_signal() => {
            tracing::info!("shutdown signal received, arming bomb");
            running.evaluation_server.self_destruct().await.ok();
            explosion.await.ok();
        }
    }

    running.supervisor_shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
    Ok(())
}

/// SIGTERM and SIGINT both trigger `self_destruct` per spec.md §6.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
