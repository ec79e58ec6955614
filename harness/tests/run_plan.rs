use std::sync::Arc;
use std::time::{Duration, Instant};

use serial_test::serial;
use simcity_core::prelude::{
    Seed, ShutdownHandle, Tier, DEPLOY_ENV_ENV, SIMCITY_ALLOWED_ENVS_ENV,
};
use simcity_engine::{InMemoryBookingApi, Policy};
use simcity_harness::{execute, run_plan, HarnessCli, HarnessOutcome, Plan};
use simcity_telemetry::EventType;

fn fast_plan(seed: &str) -> Plan {
    let mut plan = Plan::for_tier(Seed::new(seed), Tier::Smoke);
    plan.base_policy = Policy {
        tick_speed_ms: 10,
        ..Default::default()
    };
    plan.duration = Duration::from_secs(20);
    plan
}

#[test]
fn run_stops_when_the_event_budget_is_used() {
    env_logger::try_init().ok();
    let mut plan = fast_plan("budget");
    plan.max_events = 5;
    plan.base_policy.customer_spawn_rate = 1.0;

    let started = Instant::now();
    let report = run_plan(
        &plan,
        Arc::new(InMemoryBookingApi::new()),
        &ShutdownHandle::new(),
    )
    .unwrap();

    assert!(started.elapsed() < Duration::from_secs(15));
    match report.outcome {
        HarnessOutcome::Success { events, .. } => assert!(events >= 5),
        other => panic!("Expected success, got {other:?}"),
    }
    assert_eq!(report.events.first().unwrap().event_type, EventType::Start);
    assert_eq!(report.events.last().unwrap().event_type, EventType::Stop);
    assert!(report.violations.is_empty());
}

#[test]
fn run_stops_when_the_duration_elapses() {
    let mut plan = fast_plan("duration");
    plan.duration = Duration::from_millis(300);
    plan.max_events = u64::MAX;

    let report = run_plan(
        &plan,
        Arc::new(InMemoryBookingApi::new()),
        &ShutdownHandle::new(),
    )
    .unwrap();
    assert!(matches!(report.outcome, HarnessOutcome::Success { .. }));
    assert_eq!(report.snapshot.active_agents, 0);
}

#[test]
fn shutdown_signal_ends_the_run() {
    let mut plan = fast_plan("interrupted");
    plan.max_events = u64::MAX;
    let shutdown = ShutdownHandle::new();
    shutdown.shutdown();

    let started = Instant::now();
    let report = run_plan(&plan, Arc::new(InMemoryBookingApi::new()), &shutdown).unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(report.outcome, HarnessOutcome::Success { .. }));
}

#[test]
fn double_booking_fails_the_run() {
    let mut plan = fast_plan("broken");
    plan.concurrency = 50;
    plan.max_events = u64::MAX;
    plan.base_policy.slot_pool_size = 1;
    plan.base_policy.customer_spawn_rate = 1.0;

    let report = run_plan(
        &plan,
        Arc::new(InMemoryBookingApi::without_conflict_checks()),
        &ShutdownHandle::new(),
    )
    .unwrap();

    match &report.outcome {
        HarnessOutcome::Failure { invariant, .. } => assert_eq!(invariant, "slot_double_booked"),
        other => panic!("Expected failure, got {other:?}"),
    }
    assert_eq!(report.outcome.exit_code(), 1);
    assert!(report.snapshot.invariant_violations >= 1);
    assert!(report
        .events
        .iter()
        .any(|e| e.event_type == EventType::InvariantViolation));
}

#[test]
#[serial]
fn disallowed_targets_are_infrastructure_errors() {
    use clap::Parser;

    std::env::set_var(DEPLOY_ENV_ENV, "test");
    std::env::set_var(SIMCITY_ALLOWED_ENVS_ENV, "test");
    let cli = HarnessCli::parse_from([
        "simcity-harness",
        "--seed",
        "1",
        "--target-url",
        "https://api.example.com",
        "--no-progress",
    ]);
    let err = execute(cli).unwrap_err();
    assert!(format!("{err:#}").contains("api.example.com"));

    std::env::set_var(DEPLOY_ENV_ENV, "production");
    let cli = HarnessCli::parse_from([
        "simcity-harness",
        "--seed",
        "1",
        "--target-url",
        "http://localhost:3000",
        "--no-progress",
    ]);
    assert!(execute(cli).is_err());

    std::env::remove_var(DEPLOY_ENV_ENV);
    std::env::remove_var(SIMCITY_ALLOWED_ENVS_ENV);
}

#[test]
#[serial]
fn event_log_is_written_to_out() {
    use clap::Parser;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("events.jsonl");
    let cli = HarnessCli::parse_from([
        "simcity-harness",
        "--seed",
        "exported",
        "--duration",
        "1",
        "--max-events",
        "20",
        "--no-progress",
        "--out",
        out.to_str().unwrap(),
    ]);

    let report = execute(cli).unwrap();
    let written = simcity_replay_model::load_event_log(&out).unwrap();
    assert_eq!(written, report.events);
    assert_eq!(written.first().unwrap().event_type, EventType::Start);
}
