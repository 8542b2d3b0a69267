//! Call value objects

use crate::domain::shared::error::DispatchError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted layout of `creation_time`
pub const CREATION_TIME_FORMAT: &str = "%m/%d/%Y, %H:%M:%S";

/// Call status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Waiting for an operator
    Waiting,
    /// Paired with an operator
    Assigned,
    /// Handled and closed
    Completed,
}

impl CallStatus {
    /// Integer code kept in the store
    pub fn code(&self) -> i64 {
        match self {
            CallStatus::Waiting => 0,
            CallStatus::Assigned => 1,
            CallStatus::Completed => 2,
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, CallStatus::Waiting)
    }
}

impl TryFrom<i64> for CallStatus {
    type Error = DispatchError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(CallStatus::Waiting),
            1 => Ok(CallStatus::Assigned),
            2 => Ok(CallStatus::Completed),
            other => Err(DispatchError::InvalidStatus {
                kind: "call",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Waiting => f.write_str("waiting"),
            CallStatus::Assigned => f.write_str("assigned"),
            CallStatus::Completed => f.write_str("completed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        for status in [CallStatus::Waiting, CallStatus::Assigned, CallStatus::Completed] {
            assert_eq!(CallStatus::try_from(status.code()).unwrap(), status);
        }
    }

    #[test]
    fn test_status_out_of_domain() {
        let err = CallStatus::try_from(3).unwrap_err();
        assert_eq!(
            err,
            DispatchError::InvalidStatus {
                kind: "call",
                value: "3".to_string()
            }
        );
        assert!(CallStatus::try_from(-1).is_err());
    }

    #[test]
    fn test_is_waiting() {
        assert!(CallStatus::Waiting.is_waiting());
        assert!(!CallStatus::Assigned.is_waiting());
        assert!(!CallStatus::Completed.is_waiting());
    }
}
