//! Operator value objects

use crate::domain::shared::error::DispatchError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operator availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatorStatus {
    /// Free to take a call
    Idle,
    /// Handling a call
    Busy,
}

impl OperatorStatus {
    /// Integer code kept in the store
    pub fn code(&self) -> i64 {
        match self {
            OperatorStatus::Idle => 0,
            OperatorStatus::Busy => 1,
        }
    }
}

impl TryFrom<i64> for OperatorStatus {
    type Error = DispatchError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(OperatorStatus::Idle),
            1 => Ok(OperatorStatus::Busy),
            other => Err(DispatchError::InvalidStatus {
                kind: "operator",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for OperatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorStatus::Idle => f.write_str("idle"),
            OperatorStatus::Busy => f.write_str("busy"),
        }
    }
}
