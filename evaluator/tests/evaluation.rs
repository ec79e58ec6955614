use std::sync::Arc;

use simcity_core::prelude::{Seed, Tier};
use pretty_assertions::assert_eq;
use serde_json::json;
use simcity_evaluator::{
    default_dials, evaluate_replay_variant, EvaluationError, Evaluator, ReplayVariantInput,
};
use simcity_replay_model::{FileReplayStore, ReplayEntry};
use simcity_store::{NewRunRequest, RunStatus, SqliteStore};
use simcity_telemetry::{EventType, TelemetryEvent};

fn stream(bookings: usize, latency_ms: u64) -> Vec<TelemetryEvent> {
    let mut events = vec![TelemetryEvent {
        index: 0,
        event_type: EventType::AgentSpawn,
        timestamp: "2024-01-01T09:00:00.000Z".to_string(),
        data: json!({"agentId": "customer-0"}),
    }];
    for i in 0..bookings {
        events.push(TelemetryEvent {
            index: events.len() as u64,
            event_type: EventType::BookingCreated,
            timestamp: "2024-01-01T09:10:00.000Z".to_string(),
            data: json!({"bookingId": format!("b-{i}"), "fee": 1.0, "latencyMs": latency_ms}),
        });
    }
    events
}

fn recorded(dir: &std::path::Path, run_id: &str, status: &str) -> FileReplayStore {
    let store = FileReplayStore::new(dir);
    let entry = ReplayEntry::new(
        run_id.to_string(),
        json!({"status": status, "seed": "42"}),
        stream(10, 100),
    );
    store.save(&entry).unwrap();
    store
}

#[test]
fn evaluation_is_idempotent() {
    let base = stream(10, 100);
    let variant = stream(14, 200);
    let dials = default_dials();
    let input = ReplayVariantInput {
        report_hash: "abc",
        base_events: &base,
        variant_events: &variant,
        dials: &dials,
        variant_id: "slow-vendor",
    };

    let first = evaluate_replay_variant(input);
    let second = evaluate_replay_variant(input);
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(first.report_hash, "abc");
    assert_eq!(first.deltas.as_ref().unwrap()["bookingsCreated"], 4.0);
    assert_eq!(first.deltas.as_ref().unwrap()["latencyP95Ms"], 100.0);
    assert!(first.evaluation.passed);
}

#[test]
fn base_variant_omits_deltas() {
    let base = stream(3, 100);
    let dials = default_dials();
    let evaluation = evaluate_replay_variant(ReplayVariantInput {
        report_hash: "abc",
        base_events: &base,
        variant_events: &[],
        dials: &dials,
        variant_id: "base",
    });

    assert_eq!(evaluation.deltas, None);
    assert_eq!(evaluation.metrics["bookingsCreated"], 3.0);
    assert!(evaluation.evaluation.passed);

    let encoded = serde_json::to_value(&evaluation).unwrap();
    assert!(encoded.get("deltas").is_none());
    for key in ["reportHash", "variant", "metrics", "dialStatuses", "evaluation"] {
        assert!(encoded.get(key).is_some(), "missing {key}");
    }
}

#[test]
fn regressions_fail_the_verdict() {
    let base = stream(10, 100);
    let variant = stream(0, 1000);
    let dials = default_dials();
    let evaluation = evaluate_replay_variant(ReplayVariantInput {
        report_hash: "abc",
        base_events: &base,
        variant_events: &variant,
        dials: &dials,
        variant_id: "broken",
    });

    assert!(!evaluation.evaluation.passed);
    assert_eq!(evaluation.evaluation.dials_version, "dials-v1");
    assert_eq!(
        evaluation.evaluation.failed_dials,
        vec!["min-bookings-created".to_string()]
    );
}

#[test]
fn evaluator_caches_results() {
    let dir = tempfile::tempdir().unwrap();
    let replays = recorded(dir.path(), "run-1", "COMPLETED");
    replays
        .add_variant("run-1", "faster", stream(12, 50))
        .unwrap();

    let evaluator = Evaluator::new(replays);
    let first = evaluator.evaluate("run-1", Some("faster")).unwrap();
    let second = evaluator.evaluate("run-1", Some("faster")).unwrap();
    assert_eq!(first, second);
    assert_eq!(evaluator.cached_len(), 1);

    let base = evaluator.evaluate("run-1", None).unwrap();
    assert_eq!(base.variant, "base");
    assert_eq!(base.report_hash, first.report_hash);
    assert_eq!(evaluator.cached_len(), 2);
}

#[test]
fn replaced_variant_is_re_evaluated() {
    let dir = tempfile::tempdir().unwrap();
    let replays = recorded(dir.path(), "run-1", "FAILED");
    replays.add_variant("run-1", "v", stream(12, 50)).unwrap();

    let evaluator = Evaluator::new(replays.clone());
    let before = evaluator.evaluate("run-1", Some("v")).unwrap();

    replays.add_variant("run-1", "v", stream(2, 50)).unwrap();
    let after = evaluator.evaluate("run-1", Some("v")).unwrap();
    assert_eq!(before.metrics["bookingsCreated"], 12.0);
    assert_eq!(after.metrics["bookingsCreated"], 2.0);
}

#[test]
fn unknown_run_and_variant() {
    let dir = tempfile::tempdir().unwrap();
    let evaluator = Evaluator::new(recorded(dir.path(), "run-1", "COMPLETED"));

    let err = evaluator.evaluate("run-2", None).unwrap_err();
    assert!(matches!(err, EvaluationError::UnknownRun(_)));
    assert_eq!(err.status_code(), 404);

    let err = evaluator.evaluate("run-1", Some("nope")).unwrap_err();
    assert!(matches!(err, EvaluationError::UnknownVariant { .. }));
    assert_eq!(err.status_code(), 400);

    let err = evaluator.evaluate("../etc", None).unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[test]
fn incomplete_runs_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let evaluator = Evaluator::new(recorded(dir.path(), "run-1", "STOPPED"));
    let err = evaluator.evaluate("run-1", None).unwrap_err();
    assert!(matches!(err, EvaluationError::RunNotCompleted { .. }));
    assert_eq!(err.status_code(), 400);

    let store = SqliteStore::open(dir.path().join("runs.db")).unwrap();
    let running = store.submit(&NewRunRequest::new(Seed::from(7), Tier::Smoke)).unwrap();
    assert!(store.try_claim(running.id).unwrap());

    let evaluator =
        Evaluator::new(FileReplayStore::new(dir.path())).with_runs(Arc::new(store.clone()));
    let err = evaluator.evaluate(&running.run_id, None).unwrap_err();
    assert!(matches!(err, EvaluationError::RunNotCompleted { .. }));
}

#[test]
fn infrastructure_failures_are_not_scored() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("runs.db")).unwrap();
    let crashed = store.submit(&NewRunRequest::new(Seed::from(3), Tier::Smoke)).unwrap();
    assert!(store.try_claim(crashed.id).unwrap());
    assert!(store
        .finalize(crashed.id, RunStatus::Failed, None, Some("harness exited with code 137"))
        .unwrap());

    let evaluator =
        Evaluator::new(FileReplayStore::new(dir.path())).with_runs(Arc::new(store.clone()));
    let err = evaluator.evaluate(&crashed.run_id, None).unwrap_err();
    match &err {
        EvaluationError::InfrastructureFailure { error, .. } => assert!(error.contains("137")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.status_code(), 400);

    // Entries recorded with an error are refused as well.
    let replays = FileReplayStore::new(dir.path().join("replays"));
    replays
        .save(&ReplayEntry::new(
            "run-x".to_string(),
            json!({"status": "FAILED", "error": "docker daemon unavailable"}),
            stream(1, 100),
        ))
        .unwrap();
    let err = Evaluator::new(replays).evaluate("run-x", None).unwrap_err();
    assert!(matches!(err, EvaluationError::InfrastructureFailure { .. }));
}
