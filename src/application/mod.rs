//! Application services: rendering and description generation.

pub mod describe;
pub mod error;
pub mod render;
