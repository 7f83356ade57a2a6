//! One simulated run: spawn nodes, keep the registry fresh, drive fit and
//! evaluate rounds through client proxies, shut everything down.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use futures_util::future::join_all;

use fedlink_engine::{
    ClientManager, Driver, FedlinkConfig, InMemoryDriver, LinkState, NodeHandle, NodeRunner,
    RegistryUpdater, ServerConfig,
};
use fedlink_types::{
    EvaluateIns, FitIns, FitRes, Parameters, RunStatus, Scalar, UserConfig, run_status,
    run_sub_status,
};

use crate::client::sim_app;

const MODEL_SIZE: usize = 8;
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a finished simulation.
#[derive(Debug)]
pub struct Summary {
    pub rounds: u32,
    pub parameters: Parameters,
    pub last_loss: Option<f64>,
}

pub async fn run_simulation(config: &FedlinkConfig, num_nodes: usize) -> Result<Summary> {
    let state = LinkState::new();
    let run_id = state.create_run("fedlink/sim", env!("CARGO_PKG_VERSION"), "", UserConfig::new());

    let mut nodes = Vec::with_capacity(num_nodes);
    for _ in 0..num_nodes {
        let node_id = state.create_node();
        let app = sim_app().context("building client app")?;
        nodes.push(
            NodeRunner::new(state.clone(), node_id, app)
                .with_poll_interval(config.poll_interval())
                .spawn(),
        );
    }

    let mut driver = InMemoryDriver::new(state.clone())
        .with_default_ttl(config.default_ttl())
        .with_poll_interval(config.poll_interval());
    driver.set_run(run_id).await?;
    let driver: Arc<dyn Driver> = Arc::new(driver);
    state.update_run_status(run_id, RunStatus::new(run_status::RUNNING, "", ""))?;

    let manager = Arc::new(ClientManager::new());
    let updater = RegistryUpdater::spawn(
        Arc::clone(&driver),
        Arc::clone(&manager),
        config.registry_refresh(),
    );

    let outcome = async {
        match tokio::time::timeout(REGISTRATION_TIMEOUT, updater.ready()).await {
            Ok(true) => {}
            Ok(false) => bail!("registry updater stopped before its first refresh"),
            Err(_) => bail!("no successful node refresh within {REGISTRATION_TIMEOUT:?}"),
        }
        if !manager.wait_for(num_nodes, REGISTRATION_TIMEOUT).await {
            tracing::warn!(
                expected = num_nodes,
                available = manager.num_available(),
                "not all nodes registered in time"
            );
        }
        run_rounds(&manager, &config.server).await
    }
    .await;

    updater.shutdown().await?;
    shutdown_nodes(nodes).await?;

    let (sub_status, details) = match &outcome {
        Ok(_) => (run_sub_status::COMPLETED, String::new()),
        Err(err) => (run_sub_status::FAILED, format!("{err:#}")),
    };
    state.update_run_status(
        run_id,
        RunStatus::new(run_status::FINISHED, sub_status, details),
    )?;
    outcome
}

async fn shutdown_nodes(nodes: Vec<NodeHandle>) -> Result<()> {
    for node in nodes {
        let node_id = node.node_id();
        node.shutdown()
            .await
            .with_context(|| format!("stopping node {node_id}"))?;
    }
    Ok(())
}

async fn run_rounds(manager: &ClientManager, server: &ServerConfig) -> Result<Summary> {
    let timeout = server.round_timeout();
    let mut parameters = Parameters::new(vec![vec![0; MODEL_SIZE]], "bytes");
    let mut last_loss = None;

    for round in 1..=server.num_rounds {
        let clients = manager.all();
        if clients.is_empty() {
            bail!("no clients available for round {round}");
        }
        let group_id = Some(u64::from(round));

        let fits = clients.iter().map(|client| {
            let ins = FitIns {
                parameters: parameters.clone(),
                config: [("round".to_string(), Scalar::Int(i64::from(round)))].into(),
            };
            client.fit(ins, timeout, group_id)
        });
        let mut results: Vec<FitRes> = Vec::new();
        let mut failures = 0_usize;
        for result in join_all(fits).await {
            match result {
                Ok(res) if res.status.is_ok() => results.push(res),
                Ok(res) => {
                    failures += 1;
                    tracing::warn!(round, status = %res.status.code, "fit not successful");
                }
                Err(err) => {
                    failures += 1;
                    tracing::warn!(round, "fit failed: {err}");
                }
            }
        }
        tracing::info!(round, results = results.len(), failures, "fit round complete");

        // Keep the update from the client that trained on the most examples.
        if let Some(best) = results.into_iter().max_by_key(|res| res.num_examples) {
            parameters = best.parameters;
        }

        let evaluations = clients.iter().map(|client| {
            let ins = EvaluateIns {
                parameters: parameters.clone(),
                config: fedlink_types::Config::new(),
            };
            client.evaluate(ins, timeout, group_id)
        });
        let losses: Vec<f64> = join_all(evaluations)
            .await
            .into_iter()
            .filter_map(|result| match result {
                Ok(res) if res.status.is_ok() => Some(res.loss),
                Ok(_) => None,
                Err(err) => {
                    tracing::warn!(round, "evaluate failed: {err}");
                    None
                }
            })
            .collect();
        if !losses.is_empty() {
            #[allow(clippy::cast_precision_loss)]
            let mean = losses.iter().sum::<f64>() / losses.len() as f64;
            tracing::info!(round, loss = mean, "evaluate round complete");
            last_loss = Some(mean);
        }
    }

    Ok(Summary {
        rounds: server.num_rounds,
        parameters,
        last_loss,
    })
}
