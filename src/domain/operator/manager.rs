//! Operator lifecycle manager

use crate::domain::operator::aggregate::Operator;
use crate::domain::operator::value_object::OperatorStatus;
use crate::domain::shared::error::DispatchError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{encode_ref, CallId, OperatorId};
use crate::domain::store::{EntityStore, FieldWrite, Guard, Namespace, StoredRecord};
use std::sync::Arc;
use tracing::{debug, info};

const NS: Namespace = Namespace::Operators;

/// CRUD and status transitions for operators
#[derive(Clone)]
pub struct OperatorManager {
    store: Arc<dyn EntityStore>,
}

impl OperatorManager {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Create and persist an idle operator
    pub fn create(
        &self,
        firstname: impl Into<String>,
        surname: impl Into<String>,
    ) -> Result<Operator> {
        let id = self.store.allocate_id(NS)?;
        let operator = Operator::new(OperatorId::new(id), firstname.into(), surname.into());
        self.store.register(NS, id, &operator.to_fields())?;

        info!("Created operator {} ({})", operator.id(), operator.full_name());
        Ok(operator)
    }

    pub fn load(&self, id: OperatorId) -> Result<Operator> {
        let fields = self.store.get_all_fields(NS, id.value())?;
        if fields.is_empty() {
            return Err(DispatchError::NotFound {
                kind: NS.as_str(),
                id: id.value(),
            });
        }
        Operator::from_fields(id.value(), &fields)
    }

    /// Change the availability of an operator.
    ///
    /// `Idle` requires the operator to hold no call, `Busy` requires one.
    pub fn set_status(&self, operator: &mut Operator, status: OperatorStatus) -> Result<()> {
        let id = operator.id().value();
        let held = match status {
            OperatorStatus::Idle => 0,
            OperatorStatus::Busy => match operator.call_id() {
                Some(call_id) => call_id.value(),
                None => {
                    return Err(DispatchError::InvalidTransition(format!(
                        "operator {} cannot be busy without a call",
                        id
                    )));
                }
            },
        };

        let guards = [
            Guard::exists(NS, id),
            Guard::field_equals(NS, id, "call_id", held),
        ];
        let writes = [FieldWrite::new(NS, id, "status", status.code())];
        if !self.store.compare_and_set(&guards, &writes)? {
            self.ensure_live(operator.id())?;
            return Err(DispatchError::InvalidTransition(format!(
                "operator {} call reference changed, cannot become {}",
                id, status
            )));
        }

        debug!("Operator {} status -> {}", id, status);
        operator.set_status(status);
        Ok(())
    }

    /// Point an idle operator at a waiting call.
    ///
    /// Only the operator record is written; the call side of a pairing is
    /// closed by the assignment coordinator.
    pub fn set_call_id(&self, operator: &mut Operator, call_id: CallId) -> Result<()> {
        let id = operator.id();
        if operator.status() != OperatorStatus::Idle {
            return Err(DispatchError::OperatorBusy(id.value()));
        }
        if let Some(current) = operator.call_id() {
            return Err(DispatchError::AlreadyAssigned {
                operator_id: id.value(),
                call_id: current.value(),
            });
        }

        let mut guards = available_guards(id);
        guards.extend(waiting_guards(call_id));
        let writes = [FieldWrite::new(NS, id.value(), "call_id", call_id.value())];

        if !self.store.compare_and_set(&guards, &writes)? {
            return Err(pairing_conflict(self.store.as_ref(), id, call_id, None)?.unwrap_or(
                DispatchError::InvalidTransition(format!(
                    "operator {} or call {} changed concurrently",
                    id, call_id
                )),
            ));
        }

        debug!("Operator {} call_id -> {}", id, call_id);
        operator.set_call_id(Some(call_id));
        Ok(())
    }

    pub fn destroy(&self, operator: Operator) -> Result<()> {
        if !self.store.delete(NS, operator.id().value())? {
            return Err(DispatchError::StaleHandle {
                kind: NS.as_str(),
                id: operator.id().value(),
            });
        }

        info!("Destroyed operator {}", operator.id());
        Ok(())
    }

    pub fn list_ids(&self) -> Result<Vec<OperatorId>> {
        Ok(self
            .store
            .list_ids(NS)?
            .into_iter()
            .map(OperatorId::new)
            .collect())
    }

    /// Snapshot of every operator, ascending by id
    pub fn list(&self) -> Result<Vec<Operator>> {
        let mut operators = Vec::new();
        for id in self.store.list_ids(NS)? {
            let fields = self.store.get_all_fields(NS, id)?;
            if fields.is_empty() {
                continue;
            }
            operators.push(Operator::from_fields(id, &fields)?);
        }
        Ok(operators)
    }

    /// Wipe every operator. Meant for resets and tests.
    pub fn destroy_all(&self) -> Result<usize> {
        let removed = self.store.clear(NS)?;
        info!("Destroyed all operators ({} removed)", removed);
        Ok(removed)
    }

    fn ensure_live(&self, id: OperatorId) -> Result<()> {
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

/// Stored operator is idle and holds no call
pub(crate) fn available_guards(id: OperatorId) -> Vec<Guard> {
    vec![
        Guard::exists(NS, id.value()),
        Guard::field_equals(NS, id.value(), "status", OperatorStatus::Idle.code()),
        Guard::field_equals(NS, id.value(), "call_id", 0),
    ]
}

/// Stored call is waiting with no operator
pub(crate) fn waiting_guards(call_id: CallId) -> Vec<Guard> {
    let calls = Namespace::Calls;
    vec![
        Guard::exists(calls, call_id.value()),
        Guard::field_equals(calls, call_id.value(), "status", 0),
        Guard::field_equals(calls, call_id.value(), "operator_id", 0),
    ]
}

/// Re-read both records after a failed pairing write and name what blocked it.
///
/// `held` is the call the operator was expected to hold: `None` for a fresh
/// pairing, the reserved call when closing a reservation. Returns `None` when
/// both sides look pairable again, meaning the conflict resolved itself
/// between the write and this read.
pub(crate) fn pairing_conflict(
    store: &dyn EntityStore,
    operator_id: OperatorId,
    call_id: CallId,
    held: Option<CallId>,
) -> Result<Option<DispatchError>> {
    if !store.contains(NS, operator_id.value())? {
        return Ok(Some(DispatchError::StaleHandle {
            kind: NS.as_str(),
            id: operator_id.value(),
        }));
    }
    let operator = store.get_all_fields(NS, operator_id.value())?;
    if held.is_none() && operator.get("status").map(String::as_str) != Some("0") {
        return Ok(Some(DispatchError::OperatorBusy(operator_id.value())));
    }
    let expected = encode_ref(held.map(|c| c.value()));
    match operator.get("call_id") {
        Some(stored) if *stored == expected => {}
        Some(stored) if stored.as_str() != "0" => {
            return Ok(Some(DispatchError::AlreadyAssigned {
                operator_id: operator_id.value(),
                call_id: stored.parse().unwrap_or_default(),
            }));
        }
        _ => {
            return Ok(Some(DispatchError::InvalidTransition(format!(
                "operator {} no longer holds call {}",
                operator_id, call_id
            ))));
        }
    }

    let calls = Namespace::Calls;
    if !store.contains(calls, call_id.value())? {
        return Ok(Some(DispatchError::CallNotFound(call_id.value())));
    }
    let call = store.get_all_fields(calls, call_id.value())?;
    if call.get("status").map(String::as_str) != Some("0")
        || call.get("operator_id").map(String::as_str) != Some("0")
    {
        return Ok(Some(DispatchError::CallAlreadyAssigned(call_id.value())));
    }

    Ok(None)
}
