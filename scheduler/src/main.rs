use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use simcity_core::prelude::{start_shutdown_listener, Seed, SimCityResult, Tier};
use simcity_replay_model::FileReplayStore;
use simcity_scheduler::{
    DockerLauncher, ProcessLauncher, SandboxKind, SandboxLauncher, Scheduler, SchedulerConfig,
};
use simcity_store::{NewRunRequest, RunRequest, SqliteStore};
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Parser)]
#[command(name = "simcity-scheduler", about, long_about = None)]
struct SchedulerCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll for run requests until stopped with Ctrl-C
    Run,
    /// Poll once, running at most one request
    Once,
    /// Queue a run request
    Submit {
        #[clap(long)]
        seed: String,
        #[clap(long, default_value = "smoke")]
        tier: Tier,
        #[clap(long)]
        concurrency: Option<u32>,
        #[clap(long)]
        max_events: Option<u64>,
        #[clap(long)]
        duration: Option<u64>,
    },
    /// Mark a request as stopped. A running harness is left to finish, then finalised as STOPPED
    Stop { id: i64 },
    /// Show the most recent run requests
    List {
        #[clap(long, default_value = "20")]
        limit: usize,
    },
}

fn main() -> SimCityResult<()> {
    env_logger::init();
    let cli = SchedulerCli::parse();

    let config = SchedulerConfig::from_env()?;
    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;

    match cli.command {
        Command::Run => {
            let scheduler = scheduler(&config, store)?;
            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            let shutdown = start_shutdown_listener(&runtime)?;
            scheduler.run(config.poll_interval, &shutdown)?;
        }
        Command::Once => {
            let outcome = scheduler(&config, store)?.poll_once()?;
            println!("{outcome:?}");
        }
        Command::Submit {
            seed,
            tier,
            concurrency,
            max_events,
            duration,
        } => {
            let request = store.submit(&NewRunRequest {
                seed: Seed::new(seed),
                tier,
                concurrency,
                max_events,
                duration_seconds: duration,
            })?;
            println!("Queued run request {} as run {}", request.id, request.run_id);
        }
        Command::Stop { id } => {
            if store.mark_stopped(id)? {
                println!("Run request {id} marked STOPPED");
            } else {
                println!("Run request {id} has already finished");
            }
        }
        Command::List { limit } => {
            let rows: Vec<RequestRow> = store.list(limit)?.iter().map(RequestRow::from).collect();
            println!("{}", Table::new(rows).with(Style::modern()));
        }
    }

    Ok(())
}

fn scheduler(config: &SchedulerConfig, store: SqliteStore) -> SimCityResult<Scheduler> {
    let launcher: Arc<dyn SandboxLauncher> = match config.sandbox {
        SandboxKind::Docker => Arc::new(DockerLauncher::new(config.image.clone())?),
        SandboxKind::Process => Arc::new(ProcessLauncher::from_config(config)?),
    };

    Ok(Scheduler::new(
        Arc::new(store),
        launcher,
        FileReplayStore::new(config.runs_dir.clone()),
    )
    .with_target_url(config.target_url.clone()))
}

#[derive(Tabled)]
struct RequestRow {
    #[tabled(rename = "id")]
    id: i64,
    #[tabled(rename = "seed")]
    seed: String,
    #[tabled(rename = "tier")]
    tier: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "run id")]
    run_id: String,
    #[tabled(rename = "error")]
    error: String,
}

impl From<&RunRequest> for RequestRow {
    fn from(request: &RunRequest) -> Self {
        Self {
            id: request.id,
            seed: request.seed.to_string(),
            tier: request.tier.to_string(),
            status: request.status.to_string(),
            run_id: request.run_id.clone(),
            error: request.error.clone().unwrap_or_default(),
        }
    }
}
