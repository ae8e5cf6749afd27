mod check;
mod error;

use std::sync::Arc;

use callstore_api::CallState;
use callstore_engine::{BackendRegistry, CallstoreConfig, Store};
use clap::Parser;

use crate::error::CheckError;

#[derive(Parser)]
#[command(name = "callstore-check", about = "Conformance check for a call store backend")]
struct Cli {
    /// Path to TOML configuration file. Defaults apply when omitted.
    #[arg(long, env = "CALLSTORE_CONFIG")]
    config: Option<String>,

    /// Concurrent create/update cycles to run.
    #[arg(long, default_value_t = 10)]
    rounds: usize,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            tracing::info!(config = %path, "loading configuration");
            match CallstoreConfig::load(path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(error = %e, "failed to load config");
                    std::process::exit(1);
                }
            }
        }
        None => CallstoreConfig::default(),
    };

    let store = match Store::<CallState>::open(&config, &BackendRegistry::with_builtins()).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!(backend = %config.backend.kind, error = %e, "failed to open store");
            std::process::exit(1);
        }
    };

    tracing::info!(backend = %config.backend.kind, rounds = cli.rounds, "running check");
    let outcome = tokio::select! {
        r = check::run(store.clone(), cli.rounds) => r,
        _ = tokio::signal::ctrl_c() => Err(CheckError::Interrupted),
    };

    if let Err(e) = store.shutdown().await {
        tracing::error!(error = %e, "shutdown failed");
        std::process::exit(1);
    }

    match outcome {
        Ok(()) => tracing::info!(rounds = cli.rounds, "all rounds passed"),
        Err(e) => {
            tracing::error!(error = %e, "check failed");
            std::process::exit(1);
        }
    }
}
