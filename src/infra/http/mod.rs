pub mod api;
mod middleware;

pub use api::rate_limit::ApiRateLimiter;
pub use api::{ApiState, build_api_router};
pub use middleware::{REQUEST_ID_HEADER, RequestContext};

use axum::{Router, http::Method, middleware as axum_middleware};
use tower_http::cors::{Any, CorsLayer};

use crate::config::HttpSettings;

/// Full service router: API routes wrapped in response logging, request ids
/// and CORS. Preflight requests are answered before rate limiting.
pub fn build_router(state: ApiState, limits: &HttpSettings) -> Router {
    build_api_router(state, limits)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
        .layer(cors_layer())
}

/// Any origin, the common methods, and whatever headers the browser asks for.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::PUT,
            Method::PATCH,
            Method::POST,
            Method::DELETE,
        ])
        .allow_headers(Any)
}
