//! Call handle and its persisted encoding

use crate::domain::call::value_object::{CallStatus, CREATION_TIME_FORMAT};
use crate::domain::shared::error::DispatchError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{encode_ref, CallId, OperatorId};
use crate::domain::store::{
    integer_field, reference_field, required_field, EntityId, Fields, Namespace, StoredRecord,
};
use chrono::{Duration, Local, NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};

/// Inbound call
///
/// A `Call` is a point-in-time copy of the stored record. It is mutated only
/// through [`CallManager`](crate::domain::call::CallManager), which writes
/// through to the store and then updates this copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    id: CallId,
    /// Local wall-clock time, whole seconds
    creation_time: NaiveDateTime,
    phone_number: String,
    status: CallStatus,
    operator_id: Option<OperatorId>,
    description: String,
}

impl Call {
    /// Fresh waiting call created now
    pub(crate) fn new(id: CallId, phone_number: String) -> Self {
        Self {
            id,
            creation_time: Local::now().naive_local().trunc_subsecs(0),
            phone_number,
            status: CallStatus::Waiting,
            operator_id: None,
            description: String::new(),
        }
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn creation_time(&self) -> NaiveDateTime {
        self.creation_time
    }

    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn operator_id(&self) -> Option<OperatorId> {
        self.operator_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_waiting(&self) -> bool {
        self.status.is_waiting() && self.operator_id.is_none()
    }

    /// Time elapsed since the call was created. Never persisted.
    pub fn duration(&self) -> Duration {
        self.duration_at(Local::now().naive_local())
    }

    pub fn duration_at(&self, now: NaiveDateTime) -> Duration {
        now - self.creation_time
    }

    pub(crate) fn set_status(&mut self, status: CallStatus) {
        self.status = status;
    }

    pub(crate) fn set_description(&mut self, description: String) {
        self.description = description;
    }
}

impl StoredRecord for Call {
    const NAMESPACE: Namespace = Namespace::Calls;

    fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(
            "creation_time".to_string(),
            self.creation_time.format(CREATION_TIME_FORMAT).to_string(),
        );
        fields.insert("phone_number".to_string(), self.phone_number.clone());
        fields.insert("status".to_string(), self.status.code().to_string());
        fields.insert(
            "operator_id".to_string(),
            encode_ref(self.operator_id.map(|o| o.value())),
        );
        fields.insert("description".to_string(), self.description.clone());
        fields
    }

    fn from_fields(id: EntityId, fields: &Fields) -> Result<Self> {
        let ns = Self::NAMESPACE;

        let raw_time = required_field(ns, id, fields, "creation_time")?;
        let creation_time = NaiveDateTime::parse_from_str(raw_time, CREATION_TIME_FORMAT)
            .map_err(|e| DispatchError::CorruptRecord {
                kind: ns.as_str(),
                id,
                reason: format!("bad creation_time {:?}: {}", raw_time, e),
            })?;

        let status = CallStatus::try_from(integer_field(ns, id, fields, "status")?)?;

        Ok(Self {
            id: CallId::new(id),
            creation_time,
            phone_number: required_field(ns, id, fields, "phone_number")?.to_string(),
            status,
            operator_id: reference_field(ns, id, fields, "operator_id")?.map(OperatorId::new),
            // Older records may lack a description
            description: fields.get("description").cloned().unwrap_or_default(),
        })
    }
}
