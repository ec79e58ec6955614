use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use simcity_core::prelude::{Seed, Tier};
use simcity_engine::{CapabilitySet, Policy, PolicyError, UnknownCapability};

use crate::cli::HarnessCli;

pub const SIMCITY_CHAOS_RETRY_RATE_ENV: &str = "SIMCITY_CHAOS_RETRY_RATE";
pub const SIMCITY_CHAOS_RESTART_RATE_ENV: &str = "SIMCITY_CHAOS_RESTART_RATE";
pub const SIMCITY_CHAOS_REORDER_RATE_ENV: &str = "SIMCITY_CHAOS_REORDER_RATE";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaosRates {
    pub retry_rate: f64,
    pub restart_rate: f64,
    pub reorder_rate: f64,
}

/// Budgets used when a run does not set its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierDefaults {
    pub duration_seconds: u64,
    pub max_events: u64,
    pub concurrency: usize,
    pub chaos: ChaosRates,
}

impl TierDefaults {
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Smoke => Self {
                duration_seconds: 60,
                max_events: 200,
                concurrency: 2,
                chaos: ChaosRates {
                    retry_rate: 0.05,
                    restart_rate: 0.01,
                    reorder_rate: 0.05,
                },
            },
            Tier::Soak => Self {
                duration_seconds: 1800,
                max_events: 50_000,
                concurrency: 8,
                chaos: ChaosRates {
                    retry_rate: 0.10,
                    restart_rate: 0.02,
                    reorder_rate: 0.10,
                },
            },
            Tier::Stress => Self {
                duration_seconds: 600,
                max_events: 20_000,
                concurrency: 32,
                chaos: ChaosRates {
                    retry_rate: 0.25,
                    restart_rate: 0.05,
                    reorder_rate: 0.25,
                },
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Invalid value {value:?} for {name}, expected a number within [0, 1]")]
    InvalidRate { name: &'static str, value: String },
    #[error("Concurrency must be positive")]
    ZeroConcurrency,
    #[error("Max events must be positive")]
    ZeroMaxEvents,
    #[error(transparent)]
    UnknownCapability(#[from] UnknownCapability),
    #[error("Invalid policy: {0}")]
    Policy(#[from] PolicyError),
}

/// Everything one harness run needs to know. Fixed for the lifetime of the run.
#[derive(Debug, Clone)]
pub struct Plan {
    pub seed: Seed,
    pub tier: Tier,
    pub duration: Duration,
    pub max_events: u64,
    pub concurrency: usize,
    pub target_url: Option<String>,
    pub capabilities: CapabilitySet,
    pub chaos: ChaosRates,
    pub stop_on_violation: bool,
    pub show_progress: bool,
    pub out: Option<PathBuf>,
    /// Policy before the plan's concurrency and chaos rates are applied, see [Plan::policy].
    pub base_policy: Policy,
}

impl Plan {
    /// A plan using the tier's defaults for everything.
    pub fn for_tier(seed: Seed, tier: Tier) -> Self {
        let defaults = TierDefaults::for_tier(tier);
        Self {
            seed,
            tier,
            duration: Duration::from_secs(defaults.duration_seconds),
            max_events: defaults.max_events,
            concurrency: defaults.concurrency,
            target_url: None,
            capabilities: CapabilitySet::all(),
            chaos: defaults.chaos,
            stop_on_violation: true,
            show_progress: false,
            out: None,
            base_policy: Policy::default(),
        }
    }

    /// Build the plan from the command line and the process environment.
    pub fn from_cli(cli: &HarnessCli) -> Result<Self, PlanError> {
        Self::resolve(cli, |name| std::env::var(name).ok())
    }

    /// Build the plan from the command line, reading chaos overrides through `env`.
    ///
    /// Chaos rates come from the flag if given, then the environment, then the tier.
    pub fn resolve(
        cli: &HarnessCli,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, PlanError> {
        let mut plan = Self::for_tier(Seed::new(cli.seed.as_str()), cli.tier);

        if let Some(duration) = cli.duration {
            plan.duration = Duration::from_secs(duration);
        }
        if let Some(max_events) = cli.max_events {
            plan.max_events = max_events;
        }
        if let Some(concurrency) = cli.concurrency {
            plan.concurrency = concurrency;
        }
        plan.target_url = cli.target_url.clone().filter(|url| !url.trim().is_empty());
        plan.capabilities = CapabilitySet::from_ids(&cli.capabilities)?;
        plan.stop_on_violation = !cli.continue_on_violation;
        plan.show_progress = !cli.no_progress;
        plan.out = cli.out.clone();

        plan.chaos.retry_rate = pick_rate(
            "retry rate",
            cli.retry_rate,
            env(SIMCITY_CHAOS_RETRY_RATE_ENV),
            plan.chaos.retry_rate,
        )?;
        plan.chaos.restart_rate = pick_rate(
            "restart rate",
            cli.restart_rate,
            env(SIMCITY_CHAOS_RESTART_RATE_ENV),
            plan.chaos.restart_rate,
        )?;
        plan.chaos.reorder_rate = pick_rate(
            "reorder rate",
            cli.reorder_rate,
            env(SIMCITY_CHAOS_REORDER_RATE_ENV),
            plan.chaos.reorder_rate,
        )?;

        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        if self.concurrency == 0 {
            return Err(PlanError::ZeroConcurrency);
        }
        if self.max_events == 0 {
            return Err(PlanError::ZeroMaxEvents);
        }
        self.policy().validate()?;
        Ok(())
    }

    /// The policy the orchestrator starts with.
    pub fn policy(&self) -> Policy {
        Policy {
            max_concurrent_agents: self.concurrency,
            retry_rate: self.chaos.retry_rate,
            restart_rate: self.chaos.restart_rate,
            reorder_rate: self.chaos.reorder_rate,
            ..self.base_policy.clone()
        }
    }
}

fn pick_rate(
    name: &'static str,
    flag: Option<f64>,
    env: Option<String>,
    default: f64,
) -> Result<f64, PlanError> {
    let rate = match (flag, env.filter(|v| !v.trim().is_empty())) {
        (Some(rate), _) => rate,
        (None, Some(raw)) => raw.trim().parse::<f64>().map_err(|_| PlanError::InvalidRate {
            name,
            value: raw.clone(),
        })?,
        (None, None) => default,
    };

    if !(0.0..=1.0).contains(&rate) {
        return Err(PlanError::InvalidRate {
            name,
            value: rate.to_string(),
        });
    }
    Ok(rate)
}
