use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::json;
use simcity_core::prelude::{
    ensure_simcity_allowed, start_shutdown_listener, ShutdownHandle, SimCityResult,
};
use simcity_engine::{
    default_sim_start, BookingApi, HttpBookingApi, InMemoryBookingApi, InvariantChecker,
    Orchestrator, OrchestratorConfig, SimulationState, Violation,
};
use simcity_replay_model::write_event_log;
use simcity_safety::SyntheticClient;
use simcity_telemetry::{summary_table, EventType, MetricsSnapshot, Telemetry, TelemetryEvent};

use crate::cli::HarnessCli;
use crate::plan::Plan;
use crate::progress::start_progress;
use crate::protocol::HarnessOutcome;

/// How often the harness checks its budgets and the invariant observers.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: HarnessOutcome,
    pub events: Vec<TelemetryEvent>,
    pub snapshot: MetricsSnapshot,
    pub violations: Vec<Violation>,
}

#[derive(Debug)]
enum StopReason {
    Duration,
    MaxEvents,
    Violation,
    Fatal(String),
    Interrupted,
}

/// Run the harness end to end for a parsed command line: resolve the plan, pick the booking API,
/// run, then export the event log.
pub fn execute(cli: HarnessCli) -> SimCityResult<RunReport> {
    let plan = Plan::from_cli(&cli)?;

    let api: Arc<dyn BookingApi> = match &plan.target_url {
        Some(url) => {
            let environment = ensure_simcity_allowed()?;
            log::info!("Driving {url} from deploy environment {environment}");
            let client = SyntheticClient::from_env()?;
            Arc::new(HttpBookingApi::new(client, url)?)
        }
        None => {
            log::info!("No target URL given, running against the in-process booking API");
            Arc::new(InMemoryBookingApi::new())
        }
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown = start_shutdown_listener(&runtime)?;

    let report = run_plan(&plan, api, &shutdown)?;

    if let Some(out) = &plan.out {
        write_event_log(out, &report.events)?;
        log::info!("Wrote {} events to {}", report.events.len(), out.display());
    }
    eprintln!("{}", summary_table(&report.events, &report.snapshot));

    Ok(report)
}

/// Drive a simulation until a budget is used up, an invariant breaks (when the plan stops on
/// violations), a fatal error halts the engine or `shutdown` is triggered.
pub fn run_plan(
    plan: &Plan,
    api: Arc<dyn BookingApi>,
    shutdown: &ShutdownHandle,
) -> SimCityResult<RunReport> {
    let telemetry = Arc::new(Telemetry::new());
    let mut config = OrchestratorConfig::new(plan.seed.clone());
    config.capabilities = plan.capabilities.clone();
    let orchestrator = Orchestrator::new(
        config,
        SimulationState::new(plan.policy(), default_sim_start()),
        api,
        telemetry.clone(),
    );

    let mut checker = InvariantChecker::default();
    let mut violations = Vec::new();

    let progress_handle = ShutdownHandle::new();
    let progress = if plan.show_progress {
        Some(start_progress(
            plan.duration,
            telemetry.clone(),
            plan.max_events,
            progress_handle.new_listener(),
        )?)
    } else {
        None
    };

    log::info!(
        "Running {} plan for seed {}: {}s, {} events, {} agents",
        plan.tier,
        plan.seed,
        plan.duration.as_secs(),
        plan.max_events,
        plan.concurrency
    );
    orchestrator.start()?;
    let started = Instant::now();
    let mut listener = shutdown.new_listener();

    let reason = loop {
        if listener.sleep_unless_shutdown(POLL_INTERVAL) {
            break StopReason::Interrupted;
        }

        let found = checker.check(&telemetry);
        record_violations(&orchestrator, &telemetry, &found);
        violations.extend(found);

        if let Some(fatal) = orchestrator.state().fatal_error {
            break StopReason::Fatal(fatal);
        }
        if plan.stop_on_violation && !violations.is_empty() {
            break StopReason::Violation;
        }
        if telemetry.agent_event_count() as u64 >= plan.max_events {
            break StopReason::MaxEvents;
        }
        if started.elapsed() >= plan.duration {
            break StopReason::Duration;
        }
    };
    log::info!("Stopping run: {reason:?}");

    orchestrator.stop();
    let mut found = checker.check(&telemetry);
    found.extend(checker.finish());
    record_violations(&orchestrator, &telemetry, &found);
    violations.extend(found);

    progress_handle.shutdown();
    if let Some(progress) = progress {
        if progress.join().is_err() {
            log::warn!("Progress thread panicked");
        }
    }

    let events = telemetry.events();
    let snapshot = telemetry.snapshot();
    let outcome = match (&reason, violations.first()) {
        (StopReason::Fatal(message), _) => HarnessOutcome::InfraError {
            message: message.clone(),
        },
        (_, Some(violation)) => HarnessOutcome::Failure {
            invariant: violation.invariant.clone(),
            event_index: violation.event_index,
            error: Some(violation.message.clone()),
            forensic: Some(violation.forensic.clone()),
        },
        (_, None) => HarnessOutcome::Success {
            events: telemetry.agent_event_count() as u64,
            duration: telemetry.uptime_ms() as f64 / 1000.0,
        },
    };

    Ok(RunReport {
        outcome,
        events,
        snapshot,
        violations,
    })
}

fn record_violations(orchestrator: &Orchestrator, telemetry: &Telemetry, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }

    let now = DateTime::parse_from_rfc3339(&orchestrator.state().sim_time)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| default_sim_start());
    for violation in violations {
        telemetry.log(
            EventType::InvariantViolation,
            now,
            json!({
                "invariant": violation.invariant,
                "eventIndex": violation.event_index,
                "message": violation.message,
                "forensic": violation.forensic,
            }),
        );
    }
}
