//! Call bounded context - manages the lifecycle of inbound calls

pub mod aggregate;
pub mod manager;
pub mod value_object;

pub use crate::domain::shared::value_objects::CallId;
pub use aggregate::Call;
pub use manager::CallManager;
pub use value_object::{CallStatus, CREATION_TIME_FORMAT};
