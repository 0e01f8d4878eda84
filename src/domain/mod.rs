//! Domain layer types and invariants.

pub mod error;
pub mod key;
pub mod types;
pub mod validation;
