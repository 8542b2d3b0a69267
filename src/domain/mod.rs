//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - Calls and operators with their lifecycle managers
//! - The assignment coordinator pairing the two
//! - The entity store interface (port) everything persists through

pub mod call;
pub mod coordinator;
pub mod operator;
pub mod shared;
pub mod store;

// Re-export commonly used types
pub use shared::{DispatchError, Result};
