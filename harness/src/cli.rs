use clap::Parser;
use simcity_core::prelude::Tier;

#[derive(Debug, Clone, Parser)]
#[command(name = "simcity-harness", about, long_about = None)]
pub struct HarnessCli {
    /// Seed for the simulated population and every random choice they make, an integer or any
    /// string
    #[clap(long)]
    pub seed: String,

    /// The number of seconds to run for, defaults to the tier's duration
    #[clap(long)]
    pub duration: Option<u64>,

    /// Stop once this many agent events have been recorded, defaults to the tier's budget
    #[clap(long)]
    pub max_events: Option<u64>,

    /// Cap on live agents, defaults to the tier's concurrency
    #[clap(long)]
    pub concurrency: Option<usize>,

    /// Base URL of the booking API to drive.
    ///
    /// Must pass the synthetic target allowlist. When omitted the simulation runs against an
    /// in-process booking API and sends no traffic at all.
    #[clap(long)]
    pub target_url: Option<String>,

    /// Run intensity, one of smoke, soak or stress
    #[clap(long, default_value = "smoke")]
    pub tier: Tier,

    /// Write the event log to this path, one JSON event per line
    #[clap(long)]
    pub out: Option<std::path::PathBuf>,

    /// Probability of re-sending a request immediately
    #[clap(long)]
    pub retry_rate: Option<f64>,

    /// Probability of an agent forgetting its state and starting over
    #[clap(long)]
    pub restart_rate: Option<f64>,

    /// Probability of shuffling the order of a tick's agent turns
    #[clap(long)]
    pub reorder_rate: Option<f64>,

    /// Restrict agents to these capabilities, for example `--capability booking.create`.
    ///
    /// Can be given multiple times. All capabilities are enabled when none are given.
    #[clap(long = "capability")]
    pub capabilities: Vec<String>,

    /// Keep running after an invariant violation, the run still fails at the end
    #[clap(long, default_value = "false")]
    pub continue_on_violation: bool,

    /// Do not show a progress bar.
    ///
    /// This is recommended for sandboxed or CI runs where nobody is watching the terminal.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,
}
