//! The evaluation server's RPC surface, submission retry policy, and the
//! store/scorer collaborators it integrates with. The scheduling core
//! itself (job queue, worker pool, dispatcher, timeout supervisor) lives in
//! `job-core`; this crate is the part of spec.md §4.5 and the ambient
//! stack (config, error mapping, HTTP transport) wrapped around it.

pub mod app;
pub mod config;
pub mod error;
pub mod evaluation_server;
pub mod rpc;
pub mod scorer;
pub mod store;

pub use app::{build, RunningServer};
pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use evaluation_server::{EvaluationServer, MAX_COMPILATION_TENTATIVES, MAX_EVALUATION_TENTATIVES};
