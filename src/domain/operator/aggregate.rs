//! Operator handle and its persisted encoding

use crate::domain::operator::value_object::OperatorStatus;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{encode_ref, CallId, OperatorId};
use crate::domain::store::{
    integer_field, reference_field, required_field, EntityId, Fields, Namespace, StoredRecord,
};
use serde::{Deserialize, Serialize};

/// Call-center operator, handling at most one call at a time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    id: OperatorId,
    firstname: String,
    surname: String,
    status: OperatorStatus,
    call_id: Option<CallId>,
}

impl Operator {
    pub(crate) fn new(id: OperatorId, firstname: String, surname: String) -> Self {
        Self {
            id,
            firstname,
            surname,
            status: OperatorStatus::Idle,
            call_id: None,
        }
    }

    pub fn id(&self) -> OperatorId {
        self.id
    }

    pub fn firstname(&self) -> &str {
        &self.firstname
    }

    pub fn surname(&self) -> &str {
        &self.surname
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.firstname, self.surname)
    }

    pub fn status(&self) -> OperatorStatus {
        self.status
    }

    pub fn call_id(&self) -> Option<CallId> {
        self.call_id
    }

    /// Idle and not holding a call reference
    pub fn is_available(&self) -> bool {
        self.status == OperatorStatus::Idle && self.call_id.is_none()
    }

    pub(crate) fn set_status(&mut self, status: OperatorStatus) {
        self.status = status;
    }

    pub(crate) fn set_call_id(&mut self, call_id: Option<CallId>) {
        self.call_id = call_id;
    }
}

impl StoredRecord for Operator {
    const NAMESPACE: Namespace = Namespace::Operators;

    fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("firstname".to_string(), self.firstname.clone());
        fields.insert("surname".to_string(), self.surname.clone());
        fields.insert("status".to_string(), self.status.code().to_string());
        fields.insert(
            "call_id".to_string(),
            encode_ref(self.call_id.map(|c| c.value())),
        );
        fields
    }

    fn from_fields(id: EntityId, fields: &Fields) -> Result<Self> {
        let ns = Self::NAMESPACE;
        Ok(Self {
            id: OperatorId::new(id),
            firstname: required_field(ns, id, fields, "firstname")?.to_string(),
            surname: required_field(ns, id, fields, "surname")?.to_string(),
            status: OperatorStatus::try_from(integer_field(ns, id, fields, "status")?)?,
            call_id: reference_field(ns, id, fields, "call_id")?.map(CallId::new),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::error::DispatchError;

    #[test]
    fn test_new_operator_is_idle() {
        let operator = Operator::new(OperatorId::new(1), "Alexis".into(), "Dubanchet".into());
        assert_eq!(operator.status(), OperatorStatus::Idle);
        assert_eq!(operator.call_id(), None);
        assert!(operator.is_available());
        assert_eq!(operator.full_name(), "Alexis Dubanchet");
    }

    #[test]
    fn test_encoding_layout() {
        let mut operator = Operator::new(OperatorId::new(4), "Alexis".into(), "Dbn".into());
        operator.set_status(OperatorStatus::Busy);
        operator.set_call_id(Some(CallId::new(11)));

        let fields = operator.to_fields();
        assert_eq!(fields["firstname"], "Alexis");
        assert_eq!(fields["surname"], "Dbn");
        assert_eq!(fields["status"], "1");
        assert_eq!(fields["call_id"], "11");

        assert_eq!(Operator::from_fields(4, &fields).unwrap(), operator);
    }

    #[test]
    fn test_decode_missing_field() {
        let mut fields = Operator::new(OperatorId::new(2), "A".into(), "B".into()).to_fields();
        fields.remove("surname");
        assert!(matches!(
            Operator::from_fields(2, &fields),
            Err(DispatchError::CorruptRecord { kind: "operator", id: 2, .. })
        ));
    }
}
