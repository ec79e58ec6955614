use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use simcity_core::prelude::Seed;
use simcity_engine::{
    simulate, AgentLifecycleOrder, ApiError, ApiOutcome, BookingApi, BookingCall, CallContext,
    InMemoryBookingApi, InvariantChecker, Orchestrator, OrchestratorConfig, Policy,
    PolicyOverride, SimulationState, SlotDoubleBooked,
};
use simcity_telemetry::{EventType, Telemetry};

fn fast_policy() -> Policy {
    Policy {
        tick_speed_ms: 5,
        customer_spawn_rate: 1.0,
        ..Default::default()
    }
}

fn orchestrator(policy: Policy, api: Arc<dyn BookingApi>) -> Orchestrator {
    Orchestrator::new(
        OrchestratorConfig::new(Seed::new("lifecycle")),
        SimulationState::new(policy, simcity_engine::default_sim_start()),
        api,
        Arc::new(Telemetry::new()),
    )
}

#[test]
fn start_is_idempotent_and_stop_drains() {
    env_logger::try_init().ok();

    let orchestrator = orchestrator(fast_policy(), Arc::new(InMemoryBookingApi::new()));
    assert!(!orchestrator.stop());

    assert!(orchestrator.start().unwrap());
    assert!(!orchestrator.start().unwrap());
    assert!(orchestrator.is_running());

    std::thread::sleep(Duration::from_millis(100));
    assert!(orchestrator.state().tick > 0);

    assert!(orchestrator.stop());
    assert!(!orchestrator.stop());

    let state = orchestrator.state();
    assert!(!state.running);
    assert_eq!(state.live_agents, 0);

    let telemetry = orchestrator.telemetry();
    let snapshot = telemetry.snapshot();
    assert!(snapshot.total_agents_spawned > 0);
    assert_eq!(snapshot.active_agents, 0);

    let events = telemetry.events();
    assert_eq!(events.first().unwrap().event_type, EventType::Start);
    assert_eq!(events.last().unwrap().event_type, EventType::Stop);

    // No tick runs after stop.
    let ticks = orchestrator.state().tick;
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(orchestrator.state().tick, ticks);
}

#[test]
fn policy_override_applies_while_running() {
    let orchestrator = orchestrator(fast_policy(), Arc::new(InMemoryBookingApi::new()));
    orchestrator.start().unwrap();

    let next = orchestrator
        .set_policy(&PolicyOverride {
            cancel_chance: Some(0.8),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(next.cancel_chance, 0.8);
    assert_eq!(orchestrator.state().policy.cancel_chance, 0.8);
    assert!(orchestrator.is_running());

    assert!(orchestrator
        .set_policy(&PolicyOverride {
            reorder_rate: Some(-0.1),
            ..Default::default()
        })
        .is_err());
    assert_eq!(orchestrator.policy().reorder_rate, 0.0);

    orchestrator.stop();
    assert!(orchestrator
        .telemetry()
        .events()
        .iter()
        .any(|e| e.event_type == EventType::PolicyChange));
}

#[test]
fn manual_ticks_advance_simulated_time() {
    let orchestrator = orchestrator(Policy::default(), Arc::new(InMemoryBookingApi::new()));
    for _ in 0..3 {
        orchestrator.tick();
    }
    let state = orchestrator.state();
    assert_eq!(state.tick, 3);
    assert_eq!(state.sim_time, "2024-01-01T08:30:00.000Z");
}

#[test]
fn live_agents_never_exceed_the_cap() {
    let policy = Policy {
        max_concurrent_agents: 3,
        max_spawns_per_tick: 5,
        customer_spawn_rate: 1.0,
        vendor_spawn_rate: 1.0,
        ..Default::default()
    };
    let orchestrator = orchestrator(policy, Arc::new(InMemoryBookingApi::new()));
    for _ in 0..20 {
        orchestrator.tick();
        assert!(orchestrator.state().live_agents <= 3);
    }
}

#[test]
fn simulation_is_deterministic_for_a_seed() {
    let policy = Policy {
        retry_rate: 0.2,
        restart_rate: 0.05,
        reorder_rate: 0.3,
        ..Default::default()
    };
    let run = |seed: &str| {
        simulate(
            &Seed::new(seed),
            60,
            policy.clone(),
            Arc::new(InMemoryBookingApi::new()),
        )
    };

    let (snapshot_a, events_a) = run("determinism");
    let (snapshot_b, events_b) = run("determinism");
    assert_eq!(
        serde_json::to_string(&snapshot_a).unwrap(),
        serde_json::to_string(&snapshot_b).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&events_a).unwrap(),
        serde_json::to_string(&events_b).unwrap()
    );
    assert!(snapshot_a.total_agents_spawned > 0);

    let (_, events_c) = run("a different seed");
    assert_ne!(
        serde_json::to_string(&events_a).unwrap(),
        serde_json::to_string(&events_c).unwrap()
    );
}

#[test]
fn concurrent_dispatch_keeps_agent_lifecycles_ordered() {
    let policy = Policy {
        customer_spawn_rate: 1.0,
        max_spawns_per_tick: 4,
        max_concurrent_agents: 16,
        retry_rate: 0.3,
        restart_rate: 0.1,
        reorder_rate: 0.5,
        ..Default::default()
    };
    let orchestrator = orchestrator(policy, Arc::new(InMemoryBookingApi::new()));
    for _ in 0..40 {
        orchestrator.tick();
    }

    let mut checker = InvariantChecker::default();
    let mut violations = checker.check(orchestrator.telemetry());
    violations.extend(checker.finish());
    assert_eq!(violations, vec![]);
}

#[test]
fn double_booking_system_is_caught() {
    let policy = Policy {
        slot_pool_size: 1,
        customer_spawn_rate: 1.0,
        ..Default::default()
    };
    let (_, events) = simulate(
        &Seed::new("broken"),
        5,
        policy,
        Arc::new(InMemoryBookingApi::without_conflict_checks()),
    );

    let mut checker = InvariantChecker::new(vec![
        Box::new(SlotDoubleBooked::default()),
        Box::new(AgentLifecycleOrder::default()),
    ]);
    let mut violations = checker.observe_all(&events);
    violations.extend(checker.finish());
    assert!(!violations.is_empty());
    assert!(violations.iter().all(|v| v.invariant == "slot_double_booked"));
}

struct RefusingApi;

impl BookingApi for RefusingApi {
    fn execute(&self, _ctx: &CallContext, _call: &BookingCall) -> Result<ApiOutcome, ApiError> {
        Err(ApiError {
            status: None,
            message: "target not allowed".to_string(),
            latency_ms: 0,
            fatal: true,
        })
    }
}

#[test]
fn fatal_errors_halt_the_simulation() {
    let orchestrator = orchestrator(
        Policy {
            customer_spawn_rate: 1.0,
            vendor_spawn_rate: 0.0,
            max_spawns_per_tick: 1,
            ..Default::default()
        },
        Arc::new(RefusingApi),
    );

    for _ in 0..5 {
        orchestrator.tick();
    }

    let state = orchestrator.state();
    assert_eq!(state.fatal_error.as_deref(), Some("target not allowed"));
    // The first tick spawns, the second acts and fails, the rest do nothing.
    assert_eq!(state.tick, 2);
    assert_eq!(orchestrator.telemetry().snapshot().failed_actions, 1);
}
