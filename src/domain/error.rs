use thiserror::Error;

/// Reasons a diagram source is rejected before any resource is committed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("tikzCode must be a non-empty string")]
    EmptyOrWrongType,
    #[error("tikzCode too large ({actual} bytes, max {max} bytes)")]
    TooLarge { actual: usize, max: usize },
    #[error("potentially dangerous LaTeX command detected: {pattern}")]
    UnsafeContent { pattern: String },
}

impl ValidationError {
    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::EmptyOrWrongType => "invalid_input",
            ValidationError::TooLarge { .. } => "too_large",
            ValidationError::UnsafeContent { .. } => "unsafe_content",
        }
    }
}
