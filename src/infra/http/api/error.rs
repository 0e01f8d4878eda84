use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::describe::DescribeError;
use crate::application::error::ErrorReport;
use crate::application::render::RenderError;

/// Characters of LaTeX log kept in the hint of a failed compile.
const COMPILE_HINT_CHARS: usize = 2000;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const INVALID_BODY: &str = "invalid_body";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const NOT_FOUND: &str = "not_found";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    source: &'static str,
    status: StatusCode,
    code: &'static str,
    message: String,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        hint: Option<String>,
    ) -> Self {
        Self {
            source: "infra::http::api",
            status,
            code,
            message: message.into(),
            hint,
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message, None)
    }

    pub fn not_found() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            "No such endpoint",
            None,
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    fn with_source(mut self, source: &'static str) -> Self {
        self.source = source;
        self
    }

    pub fn rate_limited(retry_after: u64) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: codes::RATE_LIMITED.to_string(),
                message: "Too many requests, please try again later".to_string(),
                hint: Some(format!("Retry after {retry_after} seconds")),
            },
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        ErrorReport::from_message(
            "infra::http::api::rate_limit",
            StatusCode::TOO_MANY_REQUESTS,
            format!("rate_limited: retry_after={retry_after}"),
        )
        .attach(&mut response);
        response
    }
}

impl From<RenderError> for ApiError {
    fn from(err: RenderError) -> Self {
        let status = match &err {
            RenderError::Validation(_) | RenderError::UnsupportedFormat(_) => {
                StatusCode::BAD_REQUEST
            }
            RenderError::ProcessFailure { .. } | RenderError::MissingOutput { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            RenderError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RenderError::Spawn { .. } | RenderError::Io { .. } | RenderError::Aborted => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match &err {
            RenderError::Spawn { .. } | RenderError::Io { .. } | RenderError::Aborted => {
                "Internal error while rendering diagram".to_string()
            }
            other => other.to_string(),
        };
        let hint = err.output_tail(COMPILE_HINT_CHARS);
        ApiError::new(status, err.code(), message, hint).with_source("infra::http::api::render")
    }
}

impl From<DescribeError> for ApiError {
    fn from(err: DescribeError) -> Self {
        let status = match &err {
            DescribeError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            DescribeError::InvalidInput(_)
            | DescribeError::Validation(_)
            | DescribeError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            DescribeError::Upstream { .. } | DescribeError::MalformedReply(_) => {
                StatusCode::BAD_GATEWAY
            }
        };
        let hint = match &err {
            DescribeError::NotConfigured => {
                Some("Set ANTHROPIC_API_KEY to enable description generation".to_string())
            }
            _ => None,
        };
        ApiError::new(status, err.code(), err.to_string(), hint)
            .with_source("infra::http::api::describe")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = format!("{}: {}", self.code, self.message);
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message,
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message(self.source, self.status, detail).attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::application::render::Stage;
    use crate::domain::error::ValidationError;

    use super::*;

    #[test]
    fn render_errors_map_to_documented_statuses() {
        let cases = [
            (
                RenderError::from(ValidationError::TooLarge { actual: 2, max: 1 }),
                StatusCode::BAD_REQUEST,
                "too_large",
            ),
            (
                RenderError::UnsupportedFormat("gif".into()),
                StatusCode::BAD_REQUEST,
                "invalid_format",
            ),
            (
                RenderError::ProcessFailure {
                    stage: Stage::Compile,
                    exit_code: Some(1),
                    output: "! Undefined control sequence.".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
                "compile_failed",
            ),
            (
                RenderError::Timeout {
                    stage: Stage::Compile,
                    timeout: Duration::from_secs(30),
                },
                StatusCode::GATEWAY_TIMEOUT,
                "timeout",
            ),
            (
                RenderError::Aborted,
                StatusCode::INTERNAL_SERVER_ERROR,
                "aborted",
            ),
        ];

        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status(), status);
            assert_eq!(api.code(), code);
        }
    }

    #[test]
    fn compile_failure_carries_log_tail_as_hint() {
        let api = ApiError::from(RenderError::ProcessFailure {
            stage: Stage::Compile,
            exit_code: Some(1),
            output: "! Undefined control sequence.\nl.3 \\foo".into(),
        });
        assert_eq!(
            api.hint.as_deref(),
            Some("! Undefined control sequence.\nl.3 \\foo")
        );
    }

    #[test]
    fn describe_errors_map_to_documented_statuses() {
        assert_eq!(
            ApiError::from(DescribeError::NotConfigured).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(DescribeError::InvalidImage("bad".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(DescribeError::Upstream {
                status: Some(529),
                message: "overloaded".into()
            })
            .status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn response_attaches_error_report() {
        let response = ApiError::bad_request(codes::INVALID_INPUT, "nope").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.messages, vec!["invalid_input: nope".to_string()]);
    }
}
