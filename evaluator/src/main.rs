use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use simcity_engine::{Policy, PolicyOverride};
use simcity_evaluator::{run_replay_variant, Evaluator, Intervention, ReplayVariantRequest};
use simcity_replay_model::{load_event_log, FileReplayStore};
use simcity_store::{SqliteStore, DEFAULT_DB_PATH, SIMCITY_DB_PATH_ENV};

#[derive(Parser)]
#[command(name = "simcity-evaluator", about, long_about = None)]
struct EvaluatorCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score a recorded run against the default dials and print the result as JSON
    Evaluate {
        #[clap(long)]
        run_id: String,
        /// Variant to score, the baseline when omitted
        #[clap(long)]
        variant: Option<String>,
    },
    /// Attach an alternate event stream to a recorded run
    AddVariant {
        #[clap(long)]
        run_id: String,
        #[clap(long)]
        name: String,
        /// JSONL event log, as written by `simcity-harness --out`
        #[clap(long)]
        events: PathBuf,
    },
    /// Re-run a recorded run from its seed offline, with policy changes at chosen ticks, and
    /// store ticks FROM_TICK..=TO_TICK as a variant
    ReplayVariant {
        #[clap(long)]
        run_id: String,
        #[clap(long)]
        name: String,
        #[clap(long, default_value_t = 1)]
        from_tick: u64,
        #[clap(long)]
        to_tick: u64,
        /// Policy override applied to the default policy before the first tick, as JSON
        #[clap(long)]
        policy: Option<String>,
        /// `<tick>:<policy override as JSON>`, may be repeated
        #[clap(long = "intervention")]
        interventions: Vec<Intervention>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = EvaluatorCli::parse();

    let replays = FileReplayStore::from_env();
    log::debug!("Reading replay entries from {}", replays.root().display());

    match cli.command {
        Command::Evaluate { run_id, variant } => {
            let mut evaluator = Evaluator::new(replays);
            if let Some(store) = open_run_store()? {
                evaluator = evaluator.with_runs(Arc::new(store));
            }

            let evaluation = evaluator.evaluate(&run_id, variant.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&evaluation)?);
        }
        Command::AddVariant {
            run_id,
            name,
            events,
        } => {
            let loaded = load_event_log(&events).with_context(|| {
                format!("Failed to load variant events from {}", events.display())
            })?;
            let count = loaded.len();
            replays.add_variant(&run_id, &name, loaded)?;
            println!("Added variant {name} to {run_id} ({count} events)");
        }
        Command::ReplayVariant {
            run_id,
            name,
            from_tick,
            to_tick,
            policy,
            interventions,
        } => {
            let policy = match policy {
                Some(overrides) => serde_json::from_str::<PolicyOverride>(&overrides)
                    .context("Invalid --policy override")?
                    .apply_to(&Policy::default())?,
                None => Policy::default(),
            };
            let summary = run_replay_variant(
                &replays,
                &ReplayVariantRequest {
                    run_id,
                    name,
                    from_tick,
                    to_tick,
                    policy,
                    interventions,
                },
            )?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

/// The run store is only consulted when its database already exists, so evaluating never creates
/// an empty one.
fn open_run_store() -> anyhow::Result<Option<SqliteStore>> {
    let path = std::env::var(SIMCITY_DB_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH));
    if !path.exists() {
        log::debug!("No run database at {}", path.display());
        return Ok(None);
    }

    let store = SqliteStore::open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(Some(store))
}
