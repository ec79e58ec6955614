use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use simcity_control_api::{serve, ControlApi, DEFAULT_ADDR, SIMCITY_CONTROL_API_ADDR_ENV};
use simcity_core::prelude::{start_shutdown_listener, DeployEnvironment};
use simcity_evaluator::Evaluator;
use simcity_purge::{PurgeAuth, Purger};
use simcity_replay_model::FileReplayStore;
use simcity_store::SqliteStore;

#[derive(Parser)]
#[command(name = "simcity-control-api", about, long_about = None)]
struct ControlApiCli {
    /// Address to listen on, overriding SIMCITY_CONTROL_API_ADDR
    #[clap(long)]
    addr: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = ControlApiCli::parse();

    let addr = cli
        .addr
        .or_else(|| std::env::var(SIMCITY_CONTROL_API_ADDR_ENV).ok())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let store = SqliteStore::from_env().context("Failed to open the SimCity database")?;
    let environment = DeployEnvironment::from_env();
    log::info!("Deployment environment: {environment}");

    let evaluator = Evaluator::new(FileReplayStore::from_env()).with_runs(Arc::new(store.clone()));
    let purger = Purger::new(Arc::new(store), PurgeAuth::from_env(), environment);
    let api = Arc::new(ControlApi::new(evaluator, purger));

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown = start_shutdown_listener(&runtime)?;

    serve(api, &addr, &shutdown)
}
