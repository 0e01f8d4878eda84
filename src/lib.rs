//! TikZ diagram rendering service.
//!
//! Diagram sources are validated, hashed into an [`domain::key::ArtifactKey`],
//! looked up in a TTL cache and, on a miss, compiled by `pdflatex` and
//! converted by `pdf2svg` or `pdftoppm` under a bounded-concurrency queue.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
