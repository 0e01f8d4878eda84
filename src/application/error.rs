use std::error::Error as StdError;

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::{application::render::RenderError, config::LoadError, infra::error::InfraError};

/// Error chain attached to a response so the logging middleware can record
/// what the client only sees summarised.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Failures that end a command run.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
