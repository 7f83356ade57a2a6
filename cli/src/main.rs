//! fedlink simulation runner.
//!
//! Runs one federated run entirely in-process:
//!
//! ```text
//! main() -> LinkState + NodeRunner x N -> InMemoryDriver
//!                                             |
//!                        RegistryUpdater -> ClientManager -> rounds of fit/evaluate
//! ```
//!
//! Settings come from `~/.fedlink/config.toml` (or `FEDLINK_CONFIG`); the
//! number of simulated nodes from `FEDLINK_SIM_NODES`.

mod client;
mod sim;

use std::env;

use anyhow::{Context as _, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use fedlink_engine::FedlinkConfig;

const NODES_ENV: &str = "FEDLINK_SIM_NODES";
const DEFAULT_NODES: usize = 2;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn num_nodes() -> Result<usize> {
    match env::var(NODES_ENV) {
        Ok(raw) => {
            let count: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("{NODES_ENV} must be a positive integer, got {raw:?}"))?;
            anyhow::ensure!(count > 0, "{NODES_ENV} must be at least 1");
            Ok(count)
        }
        Err(_) => Ok(DEFAULT_NODES),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = FedlinkConfig::load().context("loading fedlink config")?;
    let nodes = num_nodes()?;
    tracing::info!(nodes, server = %config.server, "starting simulation");

    let summary = sim::run_simulation(&config, nodes).await?;
    match summary.last_loss {
        Some(loss) => tracing::info!(rounds = summary.rounds, loss, "simulation finished"),
        None => tracing::info!(rounds = summary.rounds, "simulation finished without evaluation"),
    }
    Ok(())
}
