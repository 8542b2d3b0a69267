//! PostgreSQL entity store integration tests
//!
//! Run with `DATABASE_URL` pointing at a scratch database:
//! `cargo test --test postgres_store_test -- --ignored --test-threads=1`
#![cfg(feature = "postgres")]

use std::sync::Arc;
use switchboard::domain::coordinator::{AssignmentCoordinator, Pairing};
use switchboard::domain::store::{EntityStore, FieldWrite, Fields, Guard, Namespace};
use switchboard::infrastructure::persistence::{DatabaseConfig, PgEntityStore};
use switchboard::{CallStatus, OperatorStatus};

fn setup_store() -> Arc<PgEntityStore> {
    let url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://postgres@localhost/switchboard_test".to_string());
    let config = DatabaseConfig {
        url,
        ..Default::default()
    };

    let store = PgEntityStore::connect(&config).expect("Failed to connect to database");
    store.clear(Namespace::Calls).expect("Failed to clear calls");
    store
        .clear(Namespace::Operators)
        .expect("Failed to clear operators");
    Arc::new(store)
}

fn record(pairs: &[(&str, &str)]) -> Fields {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
#[ignore] // Requires database
fn test_register_and_read_back() {
    let store = setup_store();

    let id = store.allocate_id(Namespace::Operators).unwrap();
    let fields = record(&[
        ("firstname", "Alexis"),
        ("surname", "Dbn"),
        ("status", "0"),
        ("call_id", "0"),
    ]);
    store.register(Namespace::Operators, id, &fields).unwrap();

    assert!(store.contains(Namespace::Operators, id).unwrap());
    assert_eq!(store.get_all_fields(Namespace::Operators, id).unwrap(), fields);

    assert!(store.delete(Namespace::Operators, id).unwrap());
    assert!(store
        .get_all_fields(Namespace::Operators, id)
        .unwrap()
        .is_empty());
}

#[test]
#[ignore] // Requires database
fn test_allocate_id_is_monotonic() {
    let store = setup_store();

    let first = store.allocate_id(Namespace::Calls).unwrap();
    store
        .register(Namespace::Calls, first, &record(&[("status", "0")]))
        .unwrap();
    store.delete(Namespace::Calls, first).unwrap();

    let second = store.allocate_id(Namespace::Calls).unwrap();
    assert!(second > first);
}

#[test]
#[ignore] // Requires database
fn test_compare_and_set_rejects_stale_guard() {
    let store = setup_store();
    let id = store.allocate_id(Namespace::Calls).unwrap();
    store
        .register(Namespace::Calls, id, &record(&[("status", "2")]))
        .unwrap();

    let guards = [Guard::field_equals(Namespace::Calls, id, "status", 0)];
    let writes = [FieldWrite::new(Namespace::Calls, id, "status", 1)];
    assert!(!store.compare_and_set(&guards, &writes).unwrap());
    assert_eq!(
        store.get_all_fields(Namespace::Calls, id).unwrap()["status"],
        "2"
    );
}

#[test]
#[ignore] // Requires database
fn test_dispatch_round_on_postgres() {
    let store = setup_store();
    let coordinator = AssignmentCoordinator::new(store);

    let call = coordinator.calls().create("0607080910").unwrap();
    let operator = coordinator.operators().create("Alexis", "Dbn").unwrap();

    let report = coordinator.assign_all().unwrap();
    assert_eq!(
        report.pairings,
        vec![Pairing {
            call_id: call.id(),
            operator_id: operator.id()
        }]
    );

    let completed = coordinator.complete(call.id()).unwrap();
    assert_eq!(completed.status(), CallStatus::Completed);
    assert_eq!(
        coordinator.operators().load(operator.id()).unwrap().status(),
        OperatorStatus::Idle
    );
}
