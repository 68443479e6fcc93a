//! Outbound RPC client to Worker processes.
//!
//! The scheduler only ever needs three calls against a Worker: `compile`,
//! `evaluate` (both fire-and-forget — completion is reported back later
//! through the inbound `*_finished` RPCs) and a best-effort `shut_down`.
//! This is intentionally a thin trait so the dispatcher and supervisor
//! stay testable without a network.

use std::any::Any;

use anyhow::Result;

use crate::types::{Address, SubmissionId};

/// Outbound RPC surface exposed by a Worker.
#[async_trait::async_trait]
pub trait WorkerClient: Send + Sync + 'static {
    async fn compile(&self, address: &Address, submission_id: &SubmissionId) -> Result<()>;
    async fn evaluate(&self, address: &Address, submission_id: &SubmissionId) -> Result<()>;
    /// Best-effort notification that the worker's lease was revoked.
    /// Errors are expected and should be swallowed by the caller — the
    /// worker is presumed already gone.
    async fn shut_down(&self, address: &Address, reason: &str) -> Result<()>;

    /// Escape hatch for tests that need to downcast to a concrete mock.
    fn as_any(&self) -> &dyn Any;
}

/// HTTP implementation of [`WorkerClient`].
///
/// Workers expose a small JSON-over-HTTP surface at
/// `http://{host}:{port}/rpc/{method}`; this mirrors the reference
/// deployment's XML-RPC transport with a JSON body instead, consistent
/// with the JSON-over-HTTP style used for the inbound RPC surface.
pub struct HttpWorkerClient {
    client: reqwest::Client,
}

impl HttpWorkerClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build worker RPC client"),
        }
    }

    async fn call(&self, address: &Address, method: &str, body: serde_json::Value) -> Result<()> {
        let url = format!("http://{address}/rpc/{method}");
        let response = self.client.post(&url).json(&body).send().await?;
        response.error_for_status()?;
        Ok(())
    }
}

impl Default for HttpWorkerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn compile(&self, address: &Address, submission_id: &SubmissionId) -> Result<()> {
        self.call(address, "compile", serde_json::json!({ "submission_id": submission_id.0 }))
            .await
    }

    async fn evaluate(&self, address: &Address, submission_id: &SubmissionId) -> Result<()> {
        self.call(address, "evaluate", serde_json::json!({ "submission_id": submission_id.0 }))
            .await
    }

    async fn shut_down(&self, address: &Address, reason: &str) -> Result<()> {
        self.call(address, "shut_down", serde_json::json!({ "reason": reason }))
            .await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Test double recording calls and optionally failing on command.
///
/// Available outside `#[cfg(test)]` (behind the `testing` feature) so
/// `es-server` can reuse it in its own integration tests.
#[cfg(any(test, feature = "testing"))]
#[derive(Default)]
pub struct MockWorkerClient {
    pub compile_calls: std::sync::Mutex<Vec<SubmissionId>>,
    pub evaluate_calls: std::sync::Mutex<Vec<SubmissionId>>,
    pub shutdown_log: std::sync::Mutex<Vec<(Address, String)>>,
    /// Addresses (by port) that should fail the next `compile`/`evaluate`.
    pub fail_ports: std::sync::Mutex<std::collections::HashSet<u16>>,
}

#[cfg(any(test, feature = "testing"))]
impl MockWorkerClient {
    pub fn fail_port(&self, port: u16) {
        self.fail_ports.lock().unwrap().insert(port);
    }

    pub fn shut_down_calls(&self) -> usize {
        self.shutdown_log.lock().unwrap().len()
    }
}

#[cfg(any(test, feature = "testing"))]
#[async_trait::async_trait]
impl WorkerClient for MockWorkerClient {
    async fn compile(&self, address: &Address, submission_id: &SubmissionId) -> Result<()> {
        if self.fail_ports.lock().unwrap().contains(&address.port) {
            anyhow::bail!("mock worker at {address} refused compile");
        }
        self.compile_calls.lock().unwrap().push(submission_id.clone());
        Ok(())
    }

    async fn evaluate(&self, address: &Address, submission_id: &SubmissionId) -> Result<()> {
        if self.fail_ports.lock().unwrap().contains(&address.port) {
            anyhow::bail!("mock worker at {address} refused evaluate");
        }
        self.evaluate_calls.lock().unwrap().push(submission_id.clone());
        Ok(())
    }

    async fn shut_down(&self, address: &Address, reason: &str) -> Result<()> {
        self.shutdown_log
            .lock()
            .unwrap()
            .push((address.clone(), reason.to_string()));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
