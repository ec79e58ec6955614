use pretty_assertions::assert_eq;
use serde_json::json;
use simcity_engine::{Policy, PolicyOverride};
use simcity_evaluator::{
    run_replay_variant, Evaluator, Intervention, ReplayVariantError, ReplayVariantRequest,
};
use simcity_replay_model::{FileReplayStore, ReplayEntry};
use simcity_telemetry::EventType;

fn recorded(dir: &std::path::Path, seed: serde_json::Value) -> FileReplayStore {
    let replays = FileReplayStore::new(dir);
    let entry = ReplayEntry::new(
        "run-1".to_string(),
        json!({"status": "COMPLETED", "seed": seed, "tier": "smoke"}),
        Vec::new(),
    );
    replays.save(&entry).unwrap();
    replays
}

fn busy_policy() -> Policy {
    Policy {
        customer_spawn_rate: 0.8,
        max_spawns_per_tick: 2,
        ..Default::default()
    }
}

fn request(name: &str, interventions: Vec<Intervention>) -> ReplayVariantRequest {
    ReplayVariantRequest {
        run_id: "run-1".to_string(),
        name: name.to_string(),
        from_tick: 5,
        to_tick: 30,
        policy: busy_policy(),
        interventions,
    }
}

#[test]
fn replay_variants_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let replays = recorded(dir.path(), json!("replay-seed"));

    let interventions = vec![
        "20:{\"cancelChance\":0.9}".parse().unwrap(),
        "10:{\"skinFee\":4.0}".parse().unwrap(),
    ];
    let first = run_replay_variant(&replays, &request("a", interventions.clone())).unwrap();
    let second = run_replay_variant(&replays, &request("b", interventions)).unwrap();
    assert_eq!(first.event_count, second.event_count);
    assert_eq!(first.interventions_applied, 2);

    let entry = replays.load("run-1").unwrap().unwrap();
    let a = entry.events_for("a").unwrap();
    let b = entry.events_for("b").unwrap();
    assert_eq!(
        serde_json::to_string(a).unwrap(),
        serde_json::to_string(b).unwrap()
    );

    // The window opens on tick 5 and is re-indexed from zero.
    assert_eq!(a[0].index, 0);
    assert_eq!(a[0].event_type, EventType::Tick);
    assert_eq!(a[0].data["tick"], 5);
    let ticks = a.iter().filter(|e| e.event_type == EventType::Tick).count();
    assert_eq!(ticks, 26);

    // Applied in tick order, whatever order they were given in.
    let changes: Vec<_> = a
        .iter()
        .filter(|e| e.event_type == EventType::PolicyChange)
        .map(|e| e.data["changes"].clone())
        .collect();
    assert_eq!(
        changes,
        vec![json!({"skinFee": 4.0}), json!({"cancelChance": 0.9})]
    );
}

#[test]
fn interventions_change_the_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let replays = recorded(dir.path(), json!(42));

    run_replay_variant(&replays, &request("untouched", Vec::new())).unwrap();
    let closed = Intervention {
        at_tick: 5,
        overrides: PolicyOverride {
            customer_spawn_rate: Some(0.0),
            ..Default::default()
        },
    };
    run_replay_variant(&replays, &request("no-customers", vec![closed])).unwrap();

    let entry = replays.load("run-1").unwrap().unwrap();
    let spawns = |variant: &str| {
        entry
            .events_for(variant)
            .unwrap()
            .iter()
            .filter(|e| e.event_type == EventType::AgentSpawn)
            .filter(|e| e.data["kind"] == "customer")
            .count()
    };
    assert!(spawns("untouched") > 0);
    assert_eq!(spawns("no-customers"), 0);

    let evaluation = Evaluator::new(replays)
        .evaluate("run-1", Some("no-customers"))
        .unwrap();
    assert_eq!(evaluation.variant, "no-customers");
}

#[test]
fn invalid_interventions_store_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let replays = recorded(dir.path(), json!("seed"));

    let out_of_range = Intervention {
        at_tick: 12,
        overrides: PolicyOverride {
            cancel_chance: Some(1.5),
            ..Default::default()
        },
    };
    let err = run_replay_variant(&replays, &request("bad", vec![out_of_range])).unwrap_err();
    assert!(matches!(
        err,
        ReplayVariantError::InvalidIntervention { at_tick: 12, .. }
    ));
    let entry = replays.load("run-1").unwrap().unwrap();
    assert!(entry.events_for("bad").is_none());

    let err = run_replay_variant(
        &replays,
        &ReplayVariantRequest {
            run_id: "run-2".to_string(),
            ..request("v", Vec::new())
        },
    )
    .unwrap_err();
    assert!(matches!(err, ReplayVariantError::UnknownRun(_)));
}

#[test]
fn entries_without_a_seed_cannot_be_replayed() {
    let dir = tempfile::tempdir().unwrap();
    let replays = FileReplayStore::new(dir.path());
    replays
        .save(&ReplayEntry::new(
            "run-1".to_string(),
            json!({"status": "COMPLETED"}),
            Vec::new(),
        ))
        .unwrap();

    let err = run_replay_variant(&replays, &request("v", Vec::new())).unwrap_err();
    assert!(matches!(err, ReplayVariantError::MissingSeed(_)));
}
