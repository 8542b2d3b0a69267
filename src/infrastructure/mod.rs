//! Infrastructure layer - Technical implementations
//!
//! This layer contains the entity store adapters.

pub mod persistence;
