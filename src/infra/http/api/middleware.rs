use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use super::error::ApiError;
use super::rate_limit::RateDecision;
use super::state::ApiState;

const FORWARDED_FOR: &str = "x-forwarded-for";
const RATELIMIT_LIMIT: &str = "ratelimit-limit";
const RATELIMIT_REMAINING: &str = "ratelimit-remaining";
const RATELIMIT_RESET: &str = "ratelimit-reset";
const UNKNOWN_CLIENT: &str = "unknown";

pub async fn api_rate_limit(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = client_key(
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0),
        request.headers(),
    );

    let limiter = &state.rate_limiter;
    let decision = limiter.allow(&client);
    if !decision.allowed {
        debug!(
            target = "tikzrender::http::rate_limit",
            client = %client,
            "Rate limit exhausted"
        );
        let mut response = ApiError::rate_limited(decision.reset_secs());
        insert_rate_limit_headers(response.headers_mut(), limiter.limit(), &decision);
        return response;
    }

    let mut response = next.run(request).await;
    insert_rate_limit_headers(response.headers_mut(), limiter.limit(), &decision);
    response
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, limit: u32, decision: &RateDecision) {
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(decision.reset_secs()));
}

/// Peer address of the connection, else the first `X-Forwarded-For` hop.
fn client_key(peer: Option<SocketAddr>, headers: &HeaderMap) -> String {
    if let Some(addr) = peer {
        return addr.ip().to_string();
    }
    headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}
