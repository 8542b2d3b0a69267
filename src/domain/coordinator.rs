//! Assignment coordinator
//!
//! Pairs waiting calls with idle operators. A pairing is committed as one
//! guarded write over both records: the call becomes `Assigned` with the
//! operator's id and the operator becomes `Busy` with the call's id, or
//! nothing is written at all.

use crate::domain::call::{Call, CallManager, CallStatus};
use crate::domain::operator::manager::{available_guards, pairing_conflict, waiting_guards};
use crate::domain::operator::{Operator, OperatorManager, OperatorStatus};
use crate::domain::shared::error::DispatchError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{encode_ref, CallId, OperatorId};
use crate::domain::store::{EntityStore, FieldWrite, Guard, Namespace};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How many times a guarded commit is retried when a re-read shows both
/// sides pairable again
const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Called for every call left waiting at the end of a pass.
///
/// No escalation policy is built in; implementors decide what to do with
/// calls that keep waiting.
pub trait UnassignedCallHook: Send + Sync {
    fn on_unassigned(&self, call: &Call);
}

/// Call and operator paired in one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pairing {
    pub call_id: CallId,
    pub operator_id: OperatorId,
}

/// Candidate pairing rejected because one side changed after the snapshot
#[derive(Debug, Clone, Serialize)]
pub struct PairingConflict {
    pub call_id: CallId,
    pub operator_id: OperatorId,
    pub reason: String,
    #[serde(skip)]
    pub error: DispatchError,
}

/// Outcome of [`AssignmentCoordinator::assign_all`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssignmentReport {
    pub pairings: Vec<Pairing>,
    pub unassigned: Vec<CallId>,
    pub conflicts: Vec<PairingConflict>,
}

impl AssignmentReport {
    pub fn is_empty(&self) -> bool {
        self.pairings.is_empty() && self.unassigned.is_empty() && self.conflicts.is_empty()
    }
}

enum Placement {
    Paired,
    NoOperator,
    /// The call itself stopped being pairable
    CallUnavailable,
}

/// Matches waiting calls to idle operators
pub struct AssignmentCoordinator {
    store: Arc<dyn EntityStore>,
    calls: CallManager,
    operators: OperatorManager,
    hook: Option<Arc<dyn UnassignedCallHook>>,
}

impl AssignmentCoordinator {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            calls: CallManager::new(store.clone()),
            operators: OperatorManager::new(store.clone()),
            store,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn UnassignedCallHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn calls(&self) -> &CallManager {
        &self.calls
    }

    pub fn operators(&self) -> &OperatorManager {
        &self.operators
    }

    /// Run one assignment pass.
    ///
    /// Reservations made with
    /// [`OperatorManager::set_call_id`] are closed first: the reserved call
    /// takes that operator and is kept out of general matching. Reservations
    /// pointing at a call that no longer waits are dropped, freeing the
    /// operator. The remaining waiting calls are then visited in ascending id
    /// order and each takes the lowest-id idle operator not already used in
    /// this pass. A candidate that fails its guarded commit is recorded as a
    /// conflict and the pass moves on; only storage failures abort it.
    pub fn assign_all(&self) -> Result<AssignmentReport> {
        let calls = self.calls.list()?;
        let operators = self.operators.list()?;
        let mut report = AssignmentReport::default();

        let waiting: HashSet<CallId> = calls
            .iter()
            .filter(|c| c.is_waiting())
            .map(Call::id)
            .collect();
        let mut reserved: HashSet<CallId> = HashSet::new();
        let mut free: VecDeque<OperatorId> = VecDeque::new();

        for operator in operators.iter() {
            match operator.call_id() {
                None if operator.is_available() => free.push_back(operator.id()),
                None => {}
                Some(call_id) if waiting.contains(&call_id) && !reserved.contains(&call_id) => {
                    reserved.insert(call_id);
                    if self.honor_reservation(operator, call_id, &mut report)? {
                        free.push_back(operator.id());
                    }
                }
                Some(call_id) if operator.status() == OperatorStatus::Idle => {
                    if self.drop_reservation(operator.id(), call_id)? {
                        free.push_back(operator.id());
                    }
                }
                Some(_) => {}
            }
        }

        for call in calls.iter() {
            if !call.is_waiting() {
                debug!("Call {} is {}, skipping", call.id(), call.status());
                continue;
            }
            if reserved.contains(&call.id()) {
                continue;
            }

            match self.place(call, &mut free, &mut report)? {
                Placement::Paired | Placement::CallUnavailable => {}
                Placement::NoOperator => {
                    warn!("No operator available for call {}", call.id());
                    report.unassigned.push(call.id());
                    if let Some(hook) = &self.hook {
                        hook.on_unassigned(call);
                    }
                }
            }
        }

        info!(
            "Assignment pass finished: {} paired, {} unassigned, {} conflicts",
            report.pairings.len(),
            report.unassigned.len(),
            report.conflicts.len()
        );
        Ok(report)
    }

    /// Pair one specific call with one specific operator
    pub fn assign(&self, call_id: CallId, operator_id: OperatorId) -> Result<Pairing> {
        self.commit_pairing(call_id, operator_id)?;
        info!("Call {} assigned to operator {}", call_id, operator_id);
        Ok(Pairing {
            call_id,
            operator_id,
        })
    }

    /// Close a call.
    ///
    /// An assigned call releases its operator back to idle in the same
    /// write. Completing a call twice is an error.
    pub fn complete(&self, call_id: CallId) -> Result<Call> {
        let calls_ns = Namespace::Calls;
        let operators_ns = Namespace::Operators;
        let id = call_id.value();

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let call = self.calls.load(call_id)?;
            if call.status() == CallStatus::Completed {
                return Err(DispatchError::InvalidTransition(format!(
                    "call {} is already completed",
                    call_id
                )));
            }

            let mut guards = vec![
                Guard::exists(calls_ns, id),
                Guard::field_equals(calls_ns, id, "status", call.status().code()),
                Guard::field_equals(
                    calls_ns,
                    id,
                    "operator_id",
                    encode_ref(call.operator_id().map(|o| o.value())),
                ),
            ];
            let mut writes = vec![FieldWrite::new(
                calls_ns,
                id,
                "status",
                CallStatus::Completed.code(),
            )];

            let releasing = match call.operator_id() {
                Some(operator_id) => {
                    let held = self.store.get_all_fields(operators_ns, operator_id.value())?;
                    // A destroyed operator reads back empty and is not released
                    held.get("call_id") == Some(&id.to_string())
                }
                None => false,
            };
            if let (true, Some(operator_id)) = (releasing, call.operator_id()) {
                let op = operator_id.value();
                guards.push(Guard::exists(operators_ns, op));
                guards.push(Guard::field_equals(operators_ns, op, "call_id", id));
                writes.push(FieldWrite::new(
                    operators_ns,
                    op,
                    "status",
                    OperatorStatus::Idle.code(),
                ));
                writes.push(FieldWrite::new(operators_ns, op, "call_id", 0));
            }

            if self.store.compare_and_set(&guards, &writes)? {
                match call.operator_id().filter(|_| releasing) {
                    Some(operator_id) => {
                        info!("Call {} completed, operator {} released", call_id, operator_id)
                    }
                    None => info!("Call {} completed", call_id),
                }
                return self.calls.load(call_id);
            }
            debug!("Call {} changed while completing, retrying", call_id);
        }

        Err(DispatchError::InvalidTransition(format!(
            "call {} kept changing while being completed",
            call_id
        )))
    }

    /// Close the call side of a reservation.
    ///
    /// Returns whether the operator was released and can join general
    /// matching, which happens when the reserved call stopped waiting.
    fn honor_reservation(
        &self,
        operator: &Operator,
        call_id: CallId,
        report: &mut AssignmentReport,
    ) -> Result<bool> {
        let operator_id = operator.id();
        match self.close_reservation(operator, call_id) {
            Ok(true) => {
                info!("Call {} assigned to operator {} (reserved)", call_id, operator_id);
                report.pairings.push(Pairing {
                    call_id,
                    operator_id,
                });
                Ok(false)
            }
            Ok(false) => Ok(false),
            Err(error) if error.is_storage() => Err(error),
            Err(error) => {
                warn!(
                    "Closing reservation of call {} by operator {} rejected: {}",
                    call_id, operator_id, error
                );
                let call_side = matches!(
                    error,
                    DispatchError::CallNotFound(_) | DispatchError::CallAlreadyAssigned(_)
                );
                report.conflicts.push(PairingConflict {
                    call_id,
                    operator_id,
                    reason: error.to_string(),
                    error,
                });
                if call_side && operator.status() == OperatorStatus::Idle {
                    return self.drop_reservation(operator_id, call_id);
                }
                Ok(false)
            }
        }
    }

    /// Commit a reserved pairing. `Ok(false)` means another pass already
    /// closed it.
    fn close_reservation(&self, operator: &Operator, call_id: CallId) -> Result<bool> {
        let operator_id = operator.id();
        let (call, op) = (call_id.value(), operator_id.value());
        let operators_ns = Namespace::Operators;

        let mut guards = waiting_guards(call_id);
        guards.extend([
            Guard::exists(operators_ns, op),
            Guard::field_equals(operators_ns, op, "status", operator.status().code()),
            Guard::field_equals(operators_ns, op, "call_id", call),
        ]);
        if self
            .store
            .compare_and_set(&guards, &pairing_writes(call_id, operator_id))?
        {
            return Ok(true);
        }

        let stored = self.store.get_all_fields(Namespace::Calls, call)?;
        if stored.get("status") == Some(&CallStatus::Assigned.code().to_string())
            && stored.get("operator_id") == Some(&op.to_string())
        {
            return Ok(false);
        }
        Err(
            pairing_conflict(self.store.as_ref(), operator_id, call_id, Some(call_id))?
                .unwrap_or_else(|| {
                    DispatchError::InvalidTransition(format!(
                        "operator {} changed while closing its reservation of call {}",
                        operator_id, call_id
                    ))
                }),
        )
    }

    /// Clear a reservation on a call that no longer waits, if the operator is
    /// still idle and still holds it
    fn drop_reservation(&self, operator_id: OperatorId, call_id: CallId) -> Result<bool> {
        let (op, ns) = (operator_id.value(), Namespace::Operators);
        let guards = [
            Guard::exists(ns, op),
            Guard::field_equals(ns, op, "status", OperatorStatus::Idle.code()),
            Guard::field_equals(ns, op, "call_id", call_id.value()),
        ];
        let writes = [FieldWrite::new(ns, op, "call_id", 0)];
        let dropped = self.store.compare_and_set(&guards, &writes)?;
        if dropped {
            info!(
                "Dropped reservation of call {} by operator {}",
                call_id, operator_id
            );
        }
        Ok(dropped)
    }

    fn place(
        &self,
        call: &Call,
        free: &mut VecDeque<OperatorId>,
        report: &mut AssignmentReport,
    ) -> Result<Placement> {
        while let Some(operator_id) = free.pop_front() {
            match self.commit_pairing(call.id(), operator_id) {
                Ok(()) => {
                    info!("Call {} assigned to operator {}", call.id(), operator_id);
                    report.pairings.push(Pairing {
                        call_id: call.id(),
                        operator_id,
                    });
                    return Ok(Placement::Paired);
                }
                Err(error) if error.is_storage() => return Err(error),
                Err(error) => {
                    warn!(
                        "Pairing call {} with operator {} rejected: {}",
                        call.id(),
                        operator_id,
                        error
                    );
                    let call_side = matches!(
                        error,
                        DispatchError::CallNotFound(_) | DispatchError::CallAlreadyAssigned(_)
                    );
                    report.conflicts.push(PairingConflict {
                        call_id: call.id(),
                        operator_id,
                        reason: error.to_string(),
                        error,
                    });
                    if call_side {
                        // The operator was never touched and stays up for grabs
                        free.push_front(operator_id);
                        return Ok(Placement::CallUnavailable);
                    }
                }
            }
        }
        Ok(Placement::NoOperator)
    }

    fn commit_pairing(&self, call_id: CallId, operator_id: OperatorId) -> Result<()> {
        let mut guards = waiting_guards(call_id);
        guards.extend(available_guards(operator_id));
        let writes = pairing_writes(call_id, operator_id);

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            if self.store.compare_and_set(&guards, &writes)? {
                return Ok(());
            }
            if let Some(conflict) =
                pairing_conflict(self.store.as_ref(), operator_id, call_id, None)?
            {
                return Err(conflict);
            }
        }

        Err(DispatchError::InvalidTransition(format!(
            "pairing call {} with operator {} kept conflicting",
            call_id, operator_id
        )))
    }
}

/// Both sides of a pairing: call assigned to the operator, operator busy on
/// the call
fn pairing_writes(call_id: CallId, operator_id: OperatorId) -> [FieldWrite; 4] {
    let (call, op) = (call_id.value(), operator_id.value());
    let (calls_ns, operators_ns) = (Namespace::Calls, Namespace::Operators);
    [
        FieldWrite::new(calls_ns, call, "status", CallStatus::Assigned.code()),
        FieldWrite::new(calls_ns, call, "operator_id", op),
        FieldWrite::new(operators_ns, op, "status", OperatorStatus::Busy.code()),
        FieldWrite::new(operators_ns, op, "call_id", call),
    ]
}
