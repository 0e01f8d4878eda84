use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use crate::domain::types::OutputFormat;

use super::error::{ApiError, codes};
use super::models::{DescribeRequest, HealthResponse, RenderRequest};
use super::state::ApiState;

pub const CACHE_HEADER: HeaderName = HeaderName::from_static("x-cache");
const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";

pub async fn render(
    State(state): State<ApiState>,
    payload: Result<Json<RenderRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(json_rejection)?;
    let format = parse_format(request.format.as_ref())?;

    let outcome = state
        .render
        .render(as_str(request.tikz_code.as_ref()), format)
        .await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, outcome.format.content_type()),
            (CACHE_HEADER, outcome.cache.as_str()),
        ],
        outcome.bytes,
    )
        .into_response())
}

pub async fn describe(
    State(state): State<ApiState>,
    payload: Result<Json<DescribeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(json_rejection)?;
    let format = parse_format(request.format.as_ref())?;

    let outcome = state
        .describe
        .describe(
            as_str(request.tikz_code.as_ref()),
            as_str(request.image_base64.as_ref()),
            format,
        )
        .await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, TEXT_PLAIN_UTF8),
            (CACHE_HEADER, outcome.cache.as_str()),
        ],
        outcome.descriptions.to_plain_text(),
    )
        .into_response())
}

pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        queue: state.render.queue_stats(),
        cache: state.render.cache().stats(),
        ai_descriptions: state.describe.is_enabled(),
    })
}

pub async fn not_found() -> ApiError {
    ApiError::not_found()
}

fn as_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str)
}

/// Missing or null means svg; anything else must name a supported format.
fn parse_format(value: Option<&Value>) -> Result<OutputFormat, ApiError> {
    match value {
        None | Some(Value::Null) => Ok(OutputFormat::default()),
        Some(Value::String(raw)) => raw
            .parse::<OutputFormat>()
            .map_err(|err| ApiError::bad_request("invalid_format", err.to_string())),
        Some(other) => Err(ApiError::bad_request(
            "invalid_format",
            format!("format must be a string, got {other}"),
        )),
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    let status = rejection.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::new(
            status,
            codes::INVALID_INPUT,
            "Request body too large",
            Some(rejection.body_text()),
        );
    }
    ApiError::new(
        StatusCode::BAD_REQUEST,
        codes::INVALID_BODY,
        "Request body must be a JSON object",
        Some(rejection.body_text()),
    )
}
