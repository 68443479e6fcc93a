//! Process-wide configuration, loaded once at startup.
//!
//! Follows the teacher's `Config::from_env()` convention: read
//! `dotenvy`-loaded environment variables, `.context(...)` every required
//! one, and default the optional ones.

use anyhow::{Context, Result};
use job_core::Address;

/// Options recognized at start-up (spec.md §6).
#[derive(Debug, Clone)]
pub struct Config {
    /// `(host, port)` the ES itself binds to.
    pub bind_host: String,
    pub bind_port: u16,
    /// Ordered list of worker addresses; worker id is the index into this
    /// list, per spec.md §6.
    pub workers: Vec<Address>,
    /// Seconds after which a busy worker is presumed dead.
    pub worker_timeout_secs: u64,
    /// Supervisor scan period, in seconds.
    pub worker_timeout_check_time_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_host = std::env::var("ES_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let bind_port = std::env::var("ES_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .context("invalid ES_PORT")?;

        let workers_raw = std::env::var("WORKERS").context("WORKERS must be set (comma-separated host:port pairs)")?;
        let workers = parse_workers(&workers_raw)?;

        let worker_timeout_secs = std::env::var("WORKER_TIMEOUT")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("invalid WORKER_TIMEOUT")?;
        let worker_timeout_check_time_secs = std::env::var("WORKER_TIMEOUT_CHECK_TIME")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u64>()
            .context("invalid WORKER_TIMEOUT_CHECK_TIME")?;

        Ok(Self {
            bind_host,
            bind_port,
            workers,
            worker_timeout_secs,
            worker_timeout_check_time_secs,
        })
    }
}

fn parse_workers(raw: &str) -> Result<Vec<Address>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (host, port) = pair
                .rsplit_once(':')
                .with_context(|| format!("worker entry {pair:?} is not host:port"))?;
            let port: u16 = port.parse().with_context(|| format!("invalid port in worker entry {pair:?}"))?;
            Ok(Address {
                host: host.to_string(),
                port,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_workers_splits_and_trims() {
        let workers = parse_workers(" 127.0.0.1:9000 , 127.0.0.1:9001").unwrap();
        assert_eq!(workers.len(), 2);
        assert_eq!(workers[0].port, 9000);
        assert_eq!(workers[1].port, 9001);
    }

    #[test]
    fn parse_workers_rejects_missing_port() {
        assert!(parse_workers("127.0.0.1").is_err());
    }
}
