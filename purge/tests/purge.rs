use std::sync::Arc;

use pretty_assertions::assert_eq;
use simcity_core::prelude::DeployEnvironment;
use simcity_purge::{
    purge_synthetic, Credentials, PurgeAuth, PurgeError, PurgeRequest, Purger, SyntheticRowStore,
};
use simcity_store::SqliteStore;

fn seeded_store(dir: &std::path::Path) -> SqliteStore {
    let store = SqliteStore::open(dir.join("simcity.db")).unwrap();
    for _ in 0..3 {
        store
            .insert_shared_row("bookings", Some("simcity"), "{}")
            .unwrap();
    }
    store
        .insert_shared_row("bookings", None, "{\"real\":true}")
        .unwrap();
    store
        .insert_shared_row("ops_events", Some("simcity"), "{}")
        .unwrap();
    store
        .insert_shared_row("ops_events", Some("other"), "{}")
        .unwrap();
    store
}

fn admin() -> Credentials {
    Credentials {
        authorization: None,
        admin_token: Some("secret".to_string()),
    }
}

fn purger(store: SqliteStore, environment: DeployEnvironment) -> Purger {
    Purger::new(
        Arc::new(store),
        PurgeAuth::new(Some("internal".to_string()), Some("secret".to_string())),
        environment,
    )
}

#[test]
fn dry_run_is_the_default_and_deletes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());
    let purger = purger(store.clone(), DeployEnvironment::Staging);

    let request: PurgeRequest = serde_json::from_str("{}").unwrap();
    let report = purger.purge(&admin(), &request).unwrap();

    assert!(report.dry_run);
    assert_eq!(report.total, 4);
    assert_eq!(report.tables["bookings"].count, 3);
    assert_eq!(report.tables["ops_events"].count, 1);
    assert_eq!(report.tables["availability_slots"].count, 0);
    assert_eq!(report.tables.len(), 5);
    assert!(report.errors.is_empty());
    assert_eq!(store.count_rows("bookings").unwrap(), 4);
}

#[test]
fn live_purge_removes_only_synthetic_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());
    let purger = purger(store.clone(), DeployEnvironment::Test);

    let credentials = Credentials {
        authorization: Some("Bearer internal".to_string()),
        admin_token: None,
    };
    let report = purger
        .purge(&credentials, &PurgeRequest { dry_run: Some(false) })
        .unwrap();

    assert!(!report.dry_run);
    assert_eq!(report.total, 4);
    assert_eq!(store.count_rows("bookings").unwrap(), 1);
    assert_eq!(store.count_rows("ops_events").unwrap(), 1);
    assert_eq!(store.count_synthetic("bookings", "simcity").unwrap(), 0);
}

#[test]
fn production_is_rejected_before_authentication() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());
    let purger = purger(store.clone(), DeployEnvironment::Production);

    for credentials in [admin(), Credentials::default()] {
        for dry_run in [None, Some(true), Some(false)] {
            let err = purger
                .purge(&credentials, &PurgeRequest { dry_run })
                .unwrap_err();
            assert_eq!(err.status_code(), 403);
            assert!(err.to_string().contains("production"));
        }
    }
    assert_eq!(store.count_rows("bookings").unwrap(), 4);
}

#[test]
fn unauthenticated_callers_get_401() {
    let dir = tempfile::tempdir().unwrap();
    let purger = purger(seeded_store(dir.path()), DeployEnvironment::Staging);

    let err = purger
        .purge(&Credentials::default(), &PurgeRequest::default())
        .unwrap_err();
    assert_eq!(err, PurgeError::Unauthorized);
    assert_eq!(err.status_code(), 401);
}

struct BrokenTable;

impl SyntheticRowStore for BrokenTable {
    fn count_synthetic(&self, table: &str, _source: &str) -> anyhow::Result<u64> {
        if table == "bookings" {
            anyhow::bail!("no such table: bookings");
        }
        Ok(2)
    }

    fn delete_synthetic(&self, table: &str, source: &str) -> anyhow::Result<u64> {
        self.count_synthetic(table, source)
    }
}

#[test]
fn table_failures_are_reported_per_table() {
    let report = purge_synthetic(&BrokenTable, ["bookings", "ops_events"], true);

    assert_eq!(report.total, 2);
    assert_eq!(report.tables["ops_events"].count, 2);
    assert_eq!(
        report.tables["bookings"].error.as_deref(),
        Some("no such table: bookings")
    );
    assert_eq!(report.errors, vec!["bookings: no such table: bookings".to_string()]);

    let encoded = serde_json::to_value(&report).unwrap();
    assert!(encoded["tables"]["ops_events"].get("error").is_none());
    assert_eq!(encoded["dryRun"], serde_json::json!(true));
}
