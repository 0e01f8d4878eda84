pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod state;

pub use state::ApiState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::config::HttpSettings;

pub fn build_api_router(state: ApiState, limits: &HttpSettings) -> Router {
    let rate_state = state.clone();

    Router::new()
        .route(
            "/api/render",
            post(handlers::render).layer(DefaultBodyLimit::max(limits.render_body_limit_bytes)),
        )
        .route(
            "/api/describe",
            post(handlers::describe)
                .layer(DefaultBodyLimit::max(limits.describe_body_limit_bytes)),
        )
        .route("/api/health", get(handlers::health))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(axum_middleware::from_fn_with_state(
            rate_state,
            middleware::api_rate_limit,
        ))
}
