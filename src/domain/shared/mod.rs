//! Shared kernel - types used by every part of the dispatcher

pub mod error;
pub mod result;
pub mod value_objects;

pub use error::DispatchError;
pub use result::Result;
pub use value_objects::{CallId, OperatorId};
