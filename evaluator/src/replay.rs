use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use simcity_core::prelude::Seed;
use simcity_engine::{
    default_sim_start, CapabilitySet, InMemoryBookingApi, Orchestrator, OrchestratorConfig, Policy,
    PolicyError, PolicyOverride, SimulationState,
};
use simcity_replay_model::{FileReplayStore, ReplayEntry};
use simcity_telemetry::{Telemetry, TelemetryEvent};

/// A policy override applied just before the given tick runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Intervention {
    pub at_tick: u64,
    pub overrides: PolicyOverride,
}

impl FromStr for Intervention {
    type Err = anyhow::Error;

    /// Parses `<tick>:<policy override as JSON>`, for example `12:{"skinFee":2.5}`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tick, overrides) = s
            .split_once(':')
            .with_context(|| format!("Expected <tick>:<policy override>, got '{s}'"))?;
        let at_tick = tick
            .trim()
            .parse()
            .with_context(|| format!("Invalid intervention tick '{tick}'"))?;
        let overrides = serde_json::from_str(overrides)
            .with_context(|| format!("Invalid policy override at tick {at_tick}"))?;
        Ok(Self { at_tick, overrides })
    }
}

/// A counterfactual re-run of a recorded run.
#[derive(Debug, Clone)]
pub struct ReplayVariantRequest {
    pub run_id: String,
    /// Stored as a variant of the entry under this name.
    pub name: String,
    pub from_tick: u64,
    pub to_tick: u64,
    /// Policy at tick 1, before any intervention.
    pub policy: Policy,
    pub interventions: Vec<Intervention>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayVariantSummary {
    pub run_id: String,
    pub variant: String,
    pub seed: Seed,
    pub from_tick: u64,
    pub to_tick: u64,
    pub interventions_applied: usize,
    pub event_count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayVariantError {
    #[error("No replay entry for run {0}")]
    UnknownRun(String),
    #[error("Replay entry for run {0} does not record its seed")]
    MissingSeed(String),
    #[error("Invalid tick window {from_tick}..={to_tick}, ticks start at 1")]
    InvalidWindow { from_tick: u64, to_tick: u64 },
    #[error("Intervention at tick {at_tick} is outside {from_tick}..={to_tick}")]
    InterventionOutsideWindow {
        at_tick: u64,
        from_tick: u64,
        to_tick: u64,
    },
    #[error("Intervention at tick {at_tick} was rejected: {source}")]
    InvalidIntervention {
        at_tick: u64,
        #[source]
        source: PolicyError,
    },
    #[error("Failed to read or write replay data: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Re-run a recorded run from its seed and store the window `from_tick..=to_tick` as a variant.
///
/// The run is simulated offline against a fresh [InMemoryBookingApi], so it never touches a live
/// system. Ticks before `from_tick` are simulated to reach the same state but their events are
/// not kept. Interventions apply in tick order, ties in the order given.
pub fn run_replay_variant(
    replays: &FileReplayStore,
    request: &ReplayVariantRequest,
) -> Result<ReplayVariantSummary, ReplayVariantError> {
    let entry = replays
        .load(&request.run_id)?
        .ok_or_else(|| ReplayVariantError::UnknownRun(request.run_id.clone()))?;
    let seed = recorded_seed(&entry)?;

    let events = simulate_window(&seed, request)?;
    let event_count = events.len();
    replays.add_variant(&request.run_id, &request.name, events)?;
    log::info!(
        "Stored variant {} of run {} (ticks {}..={}, {} interventions, {event_count} events)",
        request.name,
        request.run_id,
        request.from_tick,
        request.to_tick,
        request.interventions.len()
    );

    Ok(ReplayVariantSummary {
        run_id: request.run_id.clone(),
        variant: request.name.trim().to_string(),
        seed,
        from_tick: request.from_tick,
        to_tick: request.to_tick,
        interventions_applied: request.interventions.len(),
        event_count,
    })
}

/// The events of ticks `from_tick..=to_tick` of a run from `seed`, re-indexed from zero.
pub fn simulate_window(
    seed: &Seed,
    request: &ReplayVariantRequest,
) -> Result<Vec<TelemetryEvent>, ReplayVariantError> {
    let (from_tick, to_tick) = (request.from_tick, request.to_tick);
    if from_tick == 0 || from_tick > to_tick {
        return Err(ReplayVariantError::InvalidWindow { from_tick, to_tick });
    }
    if let Some(outside) = request
        .interventions
        .iter()
        .find(|i| i.at_tick < from_tick || i.at_tick > to_tick)
    {
        return Err(ReplayVariantError::InterventionOutsideWindow {
            at_tick: outside.at_tick,
            from_tick,
            to_tick,
        });
    }

    let mut interventions = request.interventions.clone();
    interventions.sort_by_key(|i| i.at_tick);
    let mut pending = interventions.into_iter().peekable();

    let telemetry = Arc::new(Telemetry::new());
    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            seed: seed.clone(),
            capabilities: CapabilitySet::all(),
            dispatch_workers: Some(1),
        },
        SimulationState::new(request.policy.clone(), default_sim_start()),
        Arc::new(InMemoryBookingApi::new()),
        telemetry.clone(),
    );

    let mut window_start = 0;
    for tick in 1..=to_tick {
        if tick == from_tick {
            window_start = telemetry.len();
        }
        while let Some(intervention) = pending.next_if(|i| i.at_tick == tick) {
            orchestrator
                .set_policy(&intervention.overrides)
                .map_err(|source| ReplayVariantError::InvalidIntervention {
                    at_tick: tick,
                    source,
                })?;
        }
        orchestrator.tick();
    }

    let events = telemetry.events_since(window_start as u64);
    Ok(events
        .into_iter()
        .enumerate()
        .map(|(index, event)| TelemetryEvent {
            index: index as u64,
            ..event
        })
        .collect())
}

/// Seeds are recorded as text, older entries may carry a bare number.
fn recorded_seed(entry: &ReplayEntry) -> Result<Seed, ReplayVariantError> {
    match entry.report.get("seed") {
        Some(serde_json::Value::String(seed)) => Ok(Seed::new(seed.as_str())),
        Some(serde_json::Value::Number(seed)) => Ok(Seed::new(seed.to_string())),
        _ => Err(ReplayVariantError::MissingSeed(entry.run_id.clone())),
    }
}
