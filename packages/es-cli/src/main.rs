//! Operator CLI for the evaluation server: a thin wrapper that turns
//! subcommands into RPC calls against a running `es-server`, per
//! spec.md §4.8. It holds no scheduling logic of its own.

use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

#[derive(Parser)]
#[command(name = "es-cli")]
#[command(about = "Operator CLI for the evaluation server")]
#[command(version)]
struct Cli {
    /// Base URL of the evaluation server's RPC surface.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080", env = "ES_CLI_SERVER")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run `es-server` in the foreground, inheriting this process's stdio.
    Run,

    /// Arm the bomb: the server finishes in-flight jobs, then exits.
    Destroy,

    /// List every registered worker and its current state.
    GetWorkersStatus,

    /// Register a new worker with the pool.
    AddWorker {
        /// Worker id.
        n: u32,
        /// Worker host.
        host: String,
        /// Worker port.
        port: u16,
    },

    /// Remove a worker from the pool. It must be Disabled first.
    DelWorker {
        /// Worker id.
        n: u32,
    },

    /// Re-enable a Disabled worker, returning it to service.
    EnableWorker {
        /// Worker id.
        n: u32,
    },

    /// Ask a worker to shut itself down directly, bypassing the evaluation
    /// server. Use when a worker is unreachable from the server but still
    /// answering its own RPC surface.
    ExitWorker {
        /// Worker host.
        host: String,
        /// Worker port.
        port: u16,
        /// Human-readable reason, logged by the worker before it exits.
        reason: String,
    },
}

fn main() -> ExitCode {
    match real_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "es-cli error:".red().bold(), e);
            ExitCode::from(1)
        }
    }
}

fn real_main() -> Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Run) {
        // `run` execs the server binary directly rather than going over RPC;
        // everything else below talks to an already-running server.
        return run_server();
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(dispatch(&cli.server, cli.command))
}

fn run_server() -> Result<()> {
    use std::os::unix::process::CommandExt;
    let err = std::process::Command::new("es-server").exec();
    bail!("failed to exec es-server: {err}")
}

async fn dispatch(server: &str, command: Commands) -> Result<()> {
    let client = reqwest::Client::new();

    match command {
        Commands::Run => unreachable!("handled before entering the async dispatcher"),

        Commands::Destroy => {
            rpc(&client, server, "self_destruct", serde_json::json!({})).await?;
            println!("{}", "bomb armed: the server will exit once its workers drain.".green());
        }

        Commands::GetWorkersStatus => {
            let body = rpc(&client, server, "get_workers_status", serde_json::json!({})).await?;
            print_worker_status(&body);
        }

        Commands::AddWorker { n, host, port } => {
            rpc(&client, server, "add_worker", serde_json::json!({ "n": n, "host": host, "port": port })).await?;
            println!("{} worker {n} added", "ok:".green());
        }

        Commands::DelWorker { n } => {
            rpc(&client, server, "del_worker", serde_json::json!({ "n": n })).await?;
            println!("{} worker {n} removed", "ok:".green());
        }

        Commands::EnableWorker { n } => {
            rpc(&client, server, "enable_worker", serde_json::json!({ "n": n })).await?;
            println!("{} worker {n} enabled", "ok:".green());
        }

        Commands::ExitWorker { host, port, reason } => {
            let url = format!("http://{host}:{port}/rpc/shut_down");
            let response = client
                .post(&url)
                .json(&serde_json::json!({ "reason": reason }))
                .send()
                .await
                .with_context(|| format!("failed to reach worker at {host}:{port}"))?;
            if !response.status().is_success() {
                bail!("worker at {host}:{port} rejected shut_down: {}", response.status());
            }
            println!("{} worker at {host}:{port} asked to shut down", "ok:".green());
        }
    }

    Ok(())
}

/// POST the RPC body to `{server}/rpc/{method}` and return the parsed JSON
/// response, per spec.md §6's `POST /rpc/{method}` convention.
async fn rpc(client: &reqwest::Client, server: &str, method: &str, body: serde_json::Value) -> Result<serde_json::Value> {
    let url = format!("{server}/rpc/{method}");
    let response = client.post(&url).json(&body).send().await.with_context(|| format!("failed to reach {url}"))?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    if !status.is_success() {
        bail!("{method} failed: {status} {text}");
    }

    if text.is_empty() {
        Ok(serde_json::Value::Null)
    } else {
        serde_json::from_str(&text).with_context(|| format!("{method} returned non-JSON body: {text}"))
    }
}

fn print_worker_status(body: &serde_json::Value) {
    let Some(entries) = body.as_array() else {
        println!("{}", "unexpected response shape from get_workers_status".red());
        return;
    };
    if entries.is_empty() {
        println!("(no workers registered)");
        return;
    }
    for entry in entries {
        let id = entry.get("worker_id").and_then(|v| v.as_u64()).unwrap_or_default();
        let address = entry.get("address").cloned().unwrap_or_default();
        let job = entry.get("job").and_then(|v| v.as_str());
        let errors = entry.get("error_count").and_then(|v| v.as_u64()).unwrap_or_default();

        let state = match job {
            Some(job) => format!("busy({job})").yellow(),
            None if errors > 0 => "disabled".red(),
            None => "inactive".green(),
        };
        println!("worker {id} @ {address}: {state} (errors: {errors})");
    }
}
