mod cli;
mod plan;
mod progress;
mod protocol;
mod run;

pub use cli::HarnessCli;
pub use plan::{
    ChaosRates, Plan, PlanError, TierDefaults, SIMCITY_CHAOS_REORDER_RATE_ENV,
    SIMCITY_CHAOS_RESTART_RATE_ENV, SIMCITY_CHAOS_RETRY_RATE_ENV,
};
pub use protocol::{parse_harness_output, HarnessError, HarnessOutcome, ParsedOutcome};
pub use run::{execute, run_plan, RunReport};
