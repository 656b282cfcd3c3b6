//! Payment ledger audit binary
//!
//! Opens the configured store, verifies the full chain and exits non-zero
//! when an integrity violation is found.
//!
//! Configuration comes from the TOML file named by the first argument, or
//! from `PAYMENT_LEDGER_*` environment variables.

use anyhow::Context;
use payment_ledger::{ChainEngine, Config, Storage};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> anyhow::Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        None => Config::from_env().context("loading config from environment")?,
    };

    tracing::info!(data_dir = ?config.data_dir, "Starting payment ledger audit");

    let storage = Arc::new(Storage::open(&config).context("opening ledger store")?);
    let engine = ChainEngine::new(storage);

    let report = engine
        .verify_full_chain()
        .context("reading ledger entries")?;

    if report.valid {
        tracing::info!(
            entries_checked = report.entries_checked,
            reason = %report.reason,
            "Ledger chain is intact"
        );
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!(
            entries_checked = report.entries_checked,
            reason = %report.reason,
            "Ledger chain verification failed"
        );
        Ok(ExitCode::FAILURE)
    }
}
