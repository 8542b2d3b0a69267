//! Concurrent writers over one shared in-memory store

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use switchboard::domain::coordinator::AssignmentCoordinator;
use switchboard::domain::store::EntityStore;
use switchboard::infrastructure::persistence::MemoryStore;
use switchboard::{CallManager, CallStatus, DispatchError, OperatorManager, OperatorStatus};

#[test]
fn test_concurrent_creators_get_distinct_ids() {
    let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());
    let calls = CallManager::new(store);

    let ids: Vec<u64> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let calls = calls.clone();
                scope.spawn(move || {
                    (0..25)
                        .map(|n| {
                            calls
                                .create(format!("06{:02}{:06}", worker, n))
                                .unwrap()
                                .id()
                                .value()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let unique: HashSet<u64> = ids.iter().copied().collect();
    assert_eq!(unique.len(), 200);
    assert_eq!(calls.list_ids().unwrap().len(), 200);
    assert_eq!(*unique.iter().max().unwrap(), 200);
}

#[test]
fn test_concurrent_passes_never_double_book() {
    let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());
    let calls = CallManager::new(store.clone());
    let operators = OperatorManager::new(store.clone());
    for n in 0..30 {
        calls.create(format!("0600{:06}", n)).unwrap();
    }
    for n in 0..20 {
        operators.create(format!("Op{}", n), "Test").unwrap();
    }

    let reports = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = AssignmentCoordinator::new(store.clone());
                scope.spawn(move || coordinator.assign_all().unwrap())
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });

    let paired: Vec<_> = reports.iter().flat_map(|r| r.pairings.iter()).collect();
    assert_eq!(paired.len(), 20);

    let paired_calls: HashSet<_> = paired.iter().map(|p| p.call_id).collect();
    let paired_operators: HashSet<_> = paired.iter().map(|p| p.operator_id).collect();
    assert_eq!(paired_calls.len(), 20);
    assert_eq!(paired_operators.len(), 20);

    for pairing in paired {
        let call = calls.load(pairing.call_id).unwrap();
        let operator = operators.load(pairing.operator_id).unwrap();
        assert_eq!(call.status(), CallStatus::Assigned);
        assert_eq!(call.operator_id(), Some(operator.id()));
        assert_eq!(operator.status(), OperatorStatus::Busy);
        assert_eq!(operator.call_id(), Some(call.id()));
    }

    let waiting = calls.list_waiting().unwrap();
    assert_eq!(waiting.len(), 10);
}

#[test]
fn test_racing_set_call_id_has_one_winner() {
    let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());
    let calls = CallManager::new(store.clone());
    let operators = OperatorManager::new(store);
    let call = calls.create("0607080910").unwrap();
    let operator = operators.create("Alexis", "Dbn").unwrap();

    let results: Vec<Result<(), DispatchError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let operators = operators.clone();
                let mut copy = operator.clone();
                let call_id = call.id();
                scope.spawn(move || operators.set_call_id(&mut copy, call_id))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.into_iter().filter_map(|r| r.err()) {
        assert!(matches!(err, DispatchError::AlreadyAssigned { .. }));
    }
}
