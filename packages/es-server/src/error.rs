//! Structured errors for the RPC surface, and their HTTP mapping.
//!
//! Every fallible path in [`crate::evaluation_server`] returns [`ApiError`],
//! which wraps both [`job_core::SchedulerError`] and
//! [`crate::store::StoreError`] so handlers don't have to juggle two error
//! enums. `IntoResponse` then does the spec.md §7 classification: caller
//! mistakes (`InvalidOperation`-class scheduler errors, `StoreError::NotFound`)
//! come back as 4xx; anything else is logged at `error!` and comes back as
//! 500. True fatal corruption is never raised here — it panics out of the
//! dispatcher/supervisor loops directly, per job-core's existing contract.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use job_core::SchedulerError;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Scheduler(e) if e.is_invalid_operation() => {
                warn!(error = %e, "rpc: rejected invalid operation");
                (StatusCode::CONFLICT, e.to_string())
            }
            ApiError::Scheduler(e) if e.is_fatal() => {
                // Should be unreachable: fatal scheduler errors panic their
                // originating loop rather than being returned to a caller.
                error!(error = %e, "rpc: unexpected fatal scheduler error surfaced to a handler");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal scheduler error".to_string())
            }
            ApiError::Scheduler(e) => {
                warn!(error = %e, "rpc: scheduler error");
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            ApiError::Store(StoreError::NotFound(id)) => {
                warn!(submission = %id, "rpc: submission not found");
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Store(e) => {
                error!(error = %e, "rpc: store error");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use job_core::WorkerId;

    #[test]
    fn invalid_operation_maps_to_409() {
        let err: ApiError = SchedulerError::WorkerNotFound(WorkerId(3)).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn not_found_store_error_maps_to_404() {
        let err: ApiError = StoreError::NotFound("s1".into()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
