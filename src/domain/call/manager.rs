//! Call lifecycle manager

use crate::domain::call::aggregate::Call;
use crate::domain::call::value_object::CallStatus;
use crate::domain::shared::error::DispatchError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::CallId;
use crate::domain::store::{EntityStore, FieldWrite, Fields, Guard, Namespace, StoredRecord};
use std::sync::Arc;
use tracing::{debug, info};

const NS: Namespace = Namespace::Calls;

/// CRUD and status transitions for calls
#[derive(Clone)]
pub struct CallManager {
    store: Arc<dyn EntityStore>,
}

impl CallManager {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Create and persist a waiting call
    pub fn create(&self, phone_number: impl Into<String>) -> Result<Call> {
        let id = self.store.allocate_id(NS)?;
        let call = Call::new(CallId::new(id), phone_number.into());
        self.store.register(NS, id, &call.to_fields())?;

        info!("Created call {} from {}", call.id(), call.phone_number());
        Ok(call)
    }

    /// Load a call by id
    pub fn load(&self, id: CallId) -> Result<Call> {
        let fields = self.store.get_all_fields(NS, id.value())?;
        if fields.is_empty() {
            return Err(DispatchError::NotFound {
                kind: NS.as_str(),
                id: id.value(),
            });
        }
        Call::from_fields(id.value(), &fields)
    }

    /// Raw persisted fields of a call, empty when the id is unknown
    pub fn fields(&self, id: CallId) -> Result<Fields> {
        self.store.get_all_fields(NS, id.value())
    }

    /// Change the status of a call that has no operator attached.
    ///
    /// `Assigned` is only reachable through the assignment coordinator. A call
    /// with an operator is closed with
    /// [`AssignmentCoordinator::complete`](crate::domain::coordinator::AssignmentCoordinator::complete),
    /// which frees the operator in the same write.
    pub fn set_status(&self, call: &mut Call, status: CallStatus) -> Result<()> {
        let id = call.id().value();
        if status == CallStatus::Assigned {
            return Err(DispatchError::InvalidTransition(format!(
                "call {} can only be assigned by pairing it with an operator",
                id
            )));
        }

        let guards = [
            Guard::exists(NS, id),
            Guard::field_equals(NS, id, "operator_id", 0),
        ];
        let writes = [FieldWrite::new(NS, id, "status", status.code())];
        if !self.store.compare_and_set(&guards, &writes)? {
            self.ensure_live(call.id())?;
            return Err(DispatchError::InvalidTransition(format!(
                "call {} has an operator attached and cannot become {}",
                id, status
            )));
        }

        debug!("Call {} status -> {}", id, status);
        call.set_status(status);
        Ok(())
    }

    pub fn set_description(&self, call: &mut Call, text: impl Into<String>) -> Result<()> {
        let id = call.id().value();
        let text = text.into();

        let guards = [Guard::exists(NS, id)];
        let writes = [FieldWrite::new(NS, id, "description", &text)];
        if !self.store.compare_and_set(&guards, &writes)? {
            return Err(DispatchError::StaleHandle {
                kind: NS.as_str(),
                id,
            });
        }

        debug!("Call {} description updated", id);
        call.set_description(text);
        Ok(())
    }

    /// Remove a call from the index and delete its record
    pub fn destroy(&self, call: Call) -> Result<()> {
        if !self.store.delete(NS, call.id().value())? {
            return Err(DispatchError::StaleHandle {
                kind: NS.as_str(),
                id: call.id().value(),
            });
        }

        info!("Destroyed call {}", call.id());
        Ok(())
    }

    pub fn list_ids(&self) -> Result<Vec<CallId>> {
        Ok(self
            .store
            .list_ids(NS)?
            .into_iter()
            .map(CallId::new)
            .collect())
    }

    /// Snapshot of every call, ascending by id
    pub fn list(&self) -> Result<Vec<Call>> {
        let mut calls = Vec::new();
        for id in self.store.list_ids(NS)? {
            let fields = self.store.get_all_fields(NS, id)?;
            // Destroyed between listing the index and reading the record
            if fields.is_empty() {
                continue;
            }
            calls.push(Call::from_fields(id, &fields)?);
        }
        Ok(calls)
    }

    /// Snapshot of calls still waiting for an operator
    pub fn list_waiting(&self) -> Result<Vec<Call>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(Call::is_waiting)
            .collect())
    }

    /// Wipe every call. Meant for resets and tests.
    pub fn destroy_all(&self) -> Result<usize> {
        let removed = self.store.clear(NS)?;
        info!("Destroyed all calls ({} removed)", removed);
        Ok(removed)
    }

    fn ensure_live(&self, id: CallId) -> Result<()> {
        if self.store.contains(NS, id.value())? {
            Ok(())
        } else {
            Err(DispatchError::StaleHandle {
                kind: NS.as_str(),
                id: id.value(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::MemoryStore;

    fn manager() -> CallManager {
        CallManager::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_create_persists_waiting_call() {
        let calls = manager();
        let call = calls.create("0678675532").unwrap();

        assert_eq!(call.id(), CallId::new(1));
        assert_eq!(call.status(), CallStatus::Waiting);
        assert_eq!(call.operator_id(), None);

        let fields = calls.fields(call.id()).unwrap();
        assert_eq!(fields["phone_number"], "0678675532");
        assert_eq!(fields["status"], "0");
        assert_eq!(fields["operator_id"], "0");
        assert_eq!(fields["description"], "");

        assert_eq!(calls.load(call.id()).unwrap(), call);
    }

    #[test]
    fn test_load_unknown_call() {
        let calls = manager();
        assert_eq!(
            calls.load(CallId::new(99)).unwrap_err(),
            DispatchError::NotFound {
                kind: "call",
                id: 99
            }
        );
        assert!(calls.fields(CallId::new(99)).unwrap().is_empty());
    }

    #[test]
    fn test_set_description_writes_through() {
        let calls = manager();
        let mut call = calls.create("0628728192").unwrap();

        calls
            .set_description(&mut call, "Bonjour, je m'appelle Alexis")
            .unwrap();

        assert_eq!(call.description(), "Bonjour, je m'appelle Alexis");
        assert_eq!(
            calls.load(call.id()).unwrap().description(),
            "Bonjour, je m'appelle Alexis"
        );
    }

    #[test]
    fn test_set_status_refuses_assigned() {
        let calls = manager();
        let mut call = calls.create("0712345678").unwrap();

        let err = calls
            .set_status(&mut call, CallStatus::Assigned)
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition(_)));
        assert_eq!(call.status(), CallStatus::Waiting);
        assert_eq!(calls.fields(call.id()).unwrap()["status"], "0");
    }

    #[test]
    fn test_set_status_completed() {
        let calls = manager();
        let mut call = calls.create("0712345678").unwrap();

        calls.set_status(&mut call, CallStatus::Completed).unwrap();
        assert_eq!(call.status(), CallStatus::Completed);
        assert_eq!(
            calls.load(call.id()).unwrap().status(),
            CallStatus::Completed
        );
    }

    #[test]
    fn test_set_status_refuses_call_with_operator() {
        let calls = manager();
        let mut call = calls.create("0712345678").unwrap();
        calls
            .store
            .set_field(NS, call.id().value(), "status", "1")
            .unwrap();
        calls
            .store
            .set_field(NS, call.id().value(), "operator_id", "4")
            .unwrap();

        for status in [CallStatus::Completed, CallStatus::Waiting] {
            assert!(matches!(
                calls.set_status(&mut call, status),
                Err(DispatchError::InvalidTransition(_))
            ));
        }
        let stored = calls.load(call.id()).unwrap();
        assert_eq!(stored.status(), CallStatus::Assigned);
        assert_eq!(stored.operator_id().map(|o| o.value()), Some(4));
    }

    #[test]
    fn test_destroyed_handle_is_stale() {
        let calls = manager();
        let call = calls.create("0678675532").unwrap();
        let mut copy = call.clone();

        calls.destroy(call).unwrap();

        assert!(calls.list_ids().unwrap().is_empty());
        assert!(calls.fields(copy.id()).unwrap().is_empty());
        assert_eq!(
            calls.set_description(&mut copy, "late").unwrap_err(),
            DispatchError::StaleHandle { kind: "call", id: 1 }
        );
        assert_eq!(
            calls
                .set_status(&mut copy, CallStatus::Completed)
                .unwrap_err(),
            DispatchError::StaleHandle { kind: "call", id: 1 }
        );
        assert!(matches!(
            calls.destroy(copy),
            Err(DispatchError::StaleHandle { .. })
        ));
    }

    #[test]
    fn test_list_is_ascending_and_complete() {
        let calls = manager();
        let first = calls.create("0628728192").unwrap();
        let second = calls.create("0712345678").unwrap();
        let mut third = calls.create("0700000000").unwrap();
        calls.set_status(&mut third, CallStatus::Completed).unwrap();

        let listed = calls.list().unwrap();
        let ids: Vec<CallId> = listed.iter().map(Call::id).collect();
        assert_eq!(ids, vec![first.id(), second.id(), third.id()]);

        let waiting: Vec<CallId> = calls.list_waiting().unwrap().iter().map(Call::id).collect();
        assert_eq!(waiting, vec![first.id(), second.id()]);
    }

    #[test]
    fn test_destroy_all_empties_index() {
        let calls = manager();
        calls.create("0628728192").unwrap();
        calls.create("0712345678").unwrap();

        assert_eq!(calls.destroy_all().unwrap(), 2);
        assert!(calls.list_ids().unwrap().is_empty());
        assert!(calls.list().unwrap().is_empty());
    }

    #[test]
    fn test_ids_are_not_reused_after_destroying_the_max() {
        let calls = manager();
        calls.create("0628728192").unwrap();
        let newest = calls.create("0712345678").unwrap();
        assert_eq!(newest.id(), CallId::new(2));

        calls.destroy(newest).unwrap();
        let next = calls.create("0700000000").unwrap();
        assert_eq!(next.id(), CallId::new(3));
    }
}
