//! Domain result type

use super::error::DispatchError;

/// Standard result type for dispatcher operations
pub type Result<T> = std::result::Result<T, DispatchError>;
