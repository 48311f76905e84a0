pub mod rate_limit;
pub mod routes;

use crate::state::AppState;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Full HTTP surface: routes, per-IP limiter, CORS and request tracing.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origin);

    Router::new()
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .route("/portfolio/add", post(routes::add_holding))
        .route("/portfolio/{user_id}", get(routes::get_portfolio))
        .route("/portfolio/{user_id}/history", get(routes::get_portfolio_history))
        .route("/market/{symbol}/daily", get(routes::get_daily_series))
        .route("/news/{symbol}", get(routes::get_news))
        .route("/predict", post(routes::predict))
        .route("/predict/stats", get(routes::prediction_stats))
        .route("/predict/history", get(routes::prediction_history))
        .route("/advisor/chat", post(routes::advisor_chat))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_requests,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origin.trim() == "*" {
        return base.allow_origin(Any);
    }
    match HeaderValue::from_str(origin.trim()) {
        Ok(value) => base.allow_origin(value),
        Err(e) => {
            tracing::warn!(origin = %origin, error = %e, "invalid CORS origin, allowing any");
            base.allow_origin(Any)
        }
    }
}
