//! Bounded-concurrency render pipeline.
//!
//! A render request is validated, looked up in the result cache and, on a
//! miss, queued as one compile → convert run whose artifacts are removed
//! before the result is delivered.

pub mod artifacts;
pub mod compile;
pub mod convert;
mod error;
pub mod pipeline;
pub mod process;
pub mod queue;
mod service;

pub use artifacts::{ARTIFACT_EXTENSIONS, ArtifactPaths, ArtifactWorkspace, cleanup};
pub use compile::LatexCompiler;
pub use convert::ImageConverter;
pub use error::{RenderError, Stage};
pub use pipeline::RenderPipeline;
pub use process::{ProcessError, ToolCommand};
pub use queue::{CompilationQueue, JobHandle, QueueError, QueueStats};
pub use service::{InFlightRenders, RenderOutcome, RenderService};
