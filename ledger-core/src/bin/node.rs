//! Ledger node binary
//!
//! Reads one JSON envelope per line from stdin, `{"caller": ..., "command": ...}`,
//! applies it and prints the receipt, or `{"error": {"kind": ..., "message": ...}}`,
//! as one JSON line on stdout. Logs go to stderr. Stops on EOF or Ctrl-C.
//!
//! Usage: `ledger-node [config.toml]`. `LEDGER_*` variables override the file.
//! When `LEDGER_SNAPSHOT` names a file, the node restores from it on start
//! (if present) and writes a fresh snapshot on exit.

use anyhow::Context;
use logistics_ledger::{
    spawn_ledger_actor, Config, Envelope, Error, ErrorKind, Ledger, Metrics, SystemClock,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_ascii_lowercase()));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config() -> anyhow::Result<Config> {
    match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .and_then(Config::with_env_overrides)
            .with_context(|| format!("loading config from {}", path)),
        None => Config::from_env().context("loading config from environment"),
    }
}

fn open_ledger(config: &Config, snapshot: Option<&PathBuf>) -> anyhow::Result<Ledger> {
    if let Some(path) = snapshot.filter(|path| path.exists()) {
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        let ledger = Ledger::restore(&bytes, Arc::new(SystemClock))
            .with_context(|| format!("restoring snapshot {}", path.display()))?;
        if ledger.administrator() != &config.administrator {
            tracing::warn!(
                snapshot = %ledger.administrator(),
                configured = %config.administrator,
                "Snapshot administrator differs from configuration; keeping snapshot"
            );
        }
        return Ok(ledger);
    }
    Ok(Ledger::new(config)?)
}

fn error_line(kind: ErrorKind, message: impl std::fmt::Display) -> String {
    json!({ "error": { "kind": kind, "message": message.to_string() } }).to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(&config);

    tracing::info!(service = %config.service_name, "Starting ledger node");

    let snapshot_path = std::env::var_os("LEDGER_SNAPSHOT").map(PathBuf::from);
    let ledger = open_ledger(&config, snapshot_path.as_ref())?;
    let metrics = Metrics::new().context("registering metrics")?;
    let (handle, task) = spawn_ledger_actor(ledger, config.mailbox_capacity, metrics.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = &mut shutdown => {
                tracing::info!("Interrupted");
                break;
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let output = match serde_json::from_str::<Envelope>(&line) {
            Ok(envelope) => match handle.submit(envelope.caller, envelope.command).await {
                Ok(receipt) => serde_json::to_string(&receipt)?,
                Err(Error::Concurrency(message)) => {
                    anyhow::bail!("ledger actor stopped: {}", message)
                }
                Err(e) => error_line(e.kind(), &e),
            },
            Err(e) => error_line(ErrorKind::Validation, format!("malformed envelope: {}", e)),
        };
        println!("{}", output);
    }

    handle.shutdown().await?;
    let ledger = task.await.context("ledger actor panicked")?;
    ledger.verify_invariants()?;

    if let Some(path) = snapshot_path {
        std::fs::write(&path, ledger.snapshot()?)
            .with_context(|| format!("writing snapshot {}", path.display()))?;
        tracing::info!(path = %path.display(), version = ledger.version(), "Snapshot written");
    }

    tracing::debug!(metrics = %metrics.encode()?, "Final metrics");
    tracing::info!(version = ledger.version(), "Shutting down ledger node");
    Ok(())
}
