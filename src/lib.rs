//! Switchboard - a call-center dispatcher
//!
//! Inbound calls wait in a shared store until the assignment coordinator
//! pairs each one with an idle operator. Calls, operators and the pairing
//! between them are kept consistent through guarded writes on the store.

pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use domain::call::{Call, CallManager, CallStatus};
pub use domain::coordinator::{AssignmentCoordinator, AssignmentReport, Pairing};
pub use domain::operator::{Operator, OperatorManager, OperatorStatus};
pub use domain::shared::error::DispatchError;
pub use domain::shared::result::Result;
pub use domain::shared::value_objects::{CallId, OperatorId};
pub use domain::store::EntityStore;
