//! Inbound RPC transport: a small JSON-over-HTTP surface built on `axum`,
//! exposing the methods of spec.md §6's table as `POST /rpc/{method}`.
//!
//! This mirrors the JSON-over-HTTP convention `job_core::worker_client`
//! already uses for the outbound leg to Workers, so the whole system speaks
//! one wire style instead of the reference deployment's XML-RPC.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use job_core::{Address, WorkerId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::evaluation_server::EvaluationServer;

pub fn router(es: Arc<EvaluationServer>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/rpc/add_job", post(add_job_handler))
        .route("/rpc/use_token", post(use_token_handler))
        .route("/rpc/compilation_finished", post(compilation_finished_handler))
        .route("/rpc/evaluation_finished", post(evaluation_finished_handler))
        .route("/rpc/self_destruct", post(self_destruct_handler))
        .route("/rpc/get_workers_status", post(get_workers_status_handler))
        .route("/rpc/add_worker", post(add_worker_handler))
        .route("/rpc/del_worker", post(del_worker_handler))
        .route("/rpc/enable_worker", post(enable_worker_handler))
        .with_state(es)
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct SubmissionIdBody {
    submission_id: String,
}

#[derive(Deserialize)]
struct FinishedBody {
    success: bool,
    submission_id: String,
}

#[derive(Deserialize)]
struct WorkerIdBody {
    n: u32,
}

#[derive(Deserialize)]
struct AddWorkerBody {
    n: u32,
    host: String,
    port: u16,
}

async fn add_job_handler(
    State(es): State<Arc<EvaluationServer>>,
    Json(body): Json<SubmissionIdBody>,
) -> Result<Json<bool>, ApiError> {
    let result = es.add_job(body.submission_id.into()).await?;
    Ok(Json(result))
}

async fn use_token_handler(
    State(es): State<Arc<EvaluationServer>>,
    Json(body): Json<SubmissionIdBody>,
) -> Result<Json<bool>, ApiError> {
    let result = es.use_token(body.submission_id.into()).await?;
    Ok(Json(result))
}

async fn compilation_finished_handler(
    State(es): State<Arc<EvaluationServer>>,
    Json(body): Json<FinishedBody>,
) -> Result<Json<bool>, ApiError> {
    let result = es.compilation_finished(body.success, body.submission_id.into()).await?;
    Ok(Json(result))
}

async fn evaluation_finished_handler(
    State(es): State<Arc<EvaluationServer>>,
    Json(body): Json<FinishedBody>,
) -> Result<Json<bool>, ApiError> {
    let result = es.evaluation_finished(body.success, body.submission_id.into()).await?;
    Ok(Json(result))
}

async fn self_destruct_handler(State(es): State<Arc<EvaluationServer>>) -> Result<Json<bool>, ApiError> {
    let result = es.self_destruct().await?;
    Ok(Json(result))
}

#[derive(Serialize, Deserialize)]
struct WorkerStatusEntry {
    worker_id: u32,
    job: Option<String>,
    address: Address,
    lease_start: Option<chrono::DateTime<chrono::Utc>>,
    error_count: u32,
    side_data: Option<(job_core::Priority, chrono::DateTime<chrono::Utc>)>,
}

async fn get_workers_status_handler(State(es): State<Arc<EvaluationServer>>) -> Json<Vec<WorkerStatusEntry>> {
    let mut entries: Vec<WorkerStatusEntry> = es
        .get_workers_status()
        .into_iter()
        .map(|(id, status)| WorkerStatusEntry {
            worker_id: id.0,
            job: status.job.map(|j| j.to_string()),
            address: status.address,
            lease_start: status.lease_start,
            error_count: status.error_count,
            side_data: status.side_data,
        })
        .collect();
    entries.sort_by_key(|e| e.worker_id);
    Json(entries)
}

async fn add_worker_handler(
    State(es): State<Arc<EvaluationServer>>,
    Json(body): Json<AddWorkerBody>,
) -> Result<StatusCode, ApiError> {
    es.add_worker(
        WorkerId(body.n),
        Address {
            host: body.host,
            port: body.port,
        },
    )?;
    Ok(StatusCode::NO_CONTENT)
}

async fn del_worker_handler(
    State(es): State<Arc<EvaluationServer>>,
    Json(body): Json<WorkerIdBody>,
) -> Result<StatusCode, ApiError> {
    es.del_worker(WorkerId(body.n))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enable_worker_handler(
    State(es): State<Arc<EvaluationServer>>,
    Json(body): Json<WorkerIdBody>,
) -> Result<StatusCode, ApiError> {
    es.enable_worker(WorkerId(body.n))?;
    Ok(StatusCode::NO_CONTENT)
}
