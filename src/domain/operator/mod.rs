//! Operator bounded context - manages the people answering calls

pub mod aggregate;
pub mod manager;
pub mod value_object;

pub use crate::domain::shared::value_objects::OperatorId;
pub use aggregate::Operator;
pub use manager::OperatorManager;
pub use value_object::OperatorStatus;
