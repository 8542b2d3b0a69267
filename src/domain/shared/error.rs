//! Domain errors

use thiserror::Error;

/// Domain result type
pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    #[error("{kind} {id} was destroyed; handle is no longer valid")]
    StaleHandle { kind: &'static str, id: u64 },

    #[error("Operator {operator_id} already holds call {call_id}")]
    AlreadyAssigned { operator_id: u64, call_id: u64 },

    #[error("Operator {0} is not available")]
    OperatorBusy(u64),

    #[error("Call {0} not found")]
    CallNotFound(u64),

    #[error("Call {0} already has an operator or is no longer waiting")]
    CallAlreadyAssigned(u64),

    #[error("Invalid {kind} status: {value}")]
    InvalidStatus { kind: &'static str, value: String },

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Corrupt {kind} record {id}: {reason}")]
    CorruptRecord {
        kind: &'static str,
        id: u64,
        reason: String,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl DispatchError {
    /// Whether this error means the backend itself failed, as opposed to a
    /// rejected transition on a single entity.
    pub fn is_storage(&self) -> bool {
        matches!(self, DispatchError::StorageUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = DispatchError::NotFound { kind: "call", id: 7 };
        assert_eq!(err.to_string(), "call 7 not found");

        let err = DispatchError::AlreadyAssigned {
            operator_id: 3,
            call_id: 9,
        };
        assert_eq!(err.to_string(), "Operator 3 already holds call 9");
    }

    #[test]
    fn test_is_storage() {
        assert!(DispatchError::StorageUnavailable("down".to_string()).is_storage());
        assert!(!DispatchError::OperatorBusy(1).is_storage());
    }
}
