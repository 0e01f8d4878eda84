use std::{fmt, time::Duration};

use thiserror::Error;

use crate::domain::{error::ValidationError, types::ParseFormatError};

use super::{process::ProcessError, queue::QueueError};

/// Pipeline step an external-process failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Compile,
    Convert,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Compile => "compile",
            Stage::Convert => "convert",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a render request. `Clone` so coalesced waiters can share one
/// outcome.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unsupported format `{0}`")]
    UnsupportedFormat(String),
    #[error("{stage} step timed out after {}ms", timeout.as_millis())]
    Timeout { stage: Stage, timeout: Duration },
    #[error("{stage} step failed (exit {exit_code:?})")]
    ProcessFailure {
        stage: Stage,
        exit_code: Option<i32>,
        output: String,
    },
    #[error("{stage} step finished without producing `{path}`")]
    MissingOutput { stage: Stage, path: String },
    #[error("{stage} tool `{program}` could not be started: {message}")]
    Spawn {
        stage: Stage,
        program: String,
        message: String,
    },
    #[error("artifact i/o failed during {stage}: {message}")]
    Io { stage: Stage, message: String },
    #[error("render task ended before delivering a result")]
    Aborted,
}

impl RenderError {
    pub(crate) fn from_process(stage: Stage, err: ProcessError) -> Self {
        match err {
            ProcessError::Timeout { timeout, .. } => RenderError::Timeout { stage, timeout },
            ProcessError::NonZeroExit {
                exit_code, output, ..
            } => RenderError::ProcessFailure {
                stage,
                exit_code,
                output,
            },
            ProcessError::Spawn { program, source } => RenderError::Spawn {
                stage,
                program,
                message: source.to_string(),
            },
            ProcessError::Wait { source, .. } => RenderError::Io {
                stage,
                message: source.to_string(),
            },
        }
    }

    pub(crate) fn io(stage: Stage, err: std::io::Error) -> Self {
        RenderError::Io {
            stage,
            message: err.to_string(),
        }
    }

    /// Stable machine-readable code used in API error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            RenderError::Validation(err) => err.code(),
            RenderError::UnsupportedFormat(_) => "invalid_format",
            RenderError::Timeout { .. } => "timeout",
            RenderError::ProcessFailure { .. } | RenderError::MissingOutput { .. } => {
                "compile_failed"
            }
            RenderError::Spawn { .. } => "tool_unavailable",
            RenderError::Io { .. } => "io_error",
            RenderError::Aborted => "aborted",
        }
    }

    /// Last lines of captured tool output, for surfacing LaTeX diagnostics.
    pub fn output_tail(&self, max_chars: usize) -> Option<String> {
        match self {
            RenderError::ProcessFailure { output, .. } => Some(tail_lines(output, max_chars)),
            _ => None,
        }
    }
}

impl From<ParseFormatError> for RenderError {
    fn from(err: ParseFormatError) -> Self {
        RenderError::UnsupportedFormat(err.0)
    }
}

impl From<QueueError> for RenderError {
    fn from(_: QueueError) -> Self {
        RenderError::Aborted
    }
}

/// At most `max_chars` from the end of `text`, starting on a line boundary
/// unless the final line alone is longer than the budget.
fn tail_lines(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim_end();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    let start = trimmed
        .char_indices()
        .nth(count - max_chars)
        .map_or(0, |(index, _)| index);
    let tail = &trimmed[start..];
    if trimmed[..start].ends_with('\n') {
        return tail.to_string();
    }
    match tail.find('\n') {
        Some(newline) => tail[newline + 1..].to_string(),
        None => tail.to_string(),
    }
}
