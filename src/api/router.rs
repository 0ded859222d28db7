use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::infrastructure::observability::{create_metrics_router, PrometheusMetrics};

use super::agent;
use super::health;
use super::middleware::{agent_auth_middleware, logging_middleware, metrics_middleware};
use super::state::AppState;

/// Create the full router with application state
///
/// Service health routes are served as-is; everything under the agent prefix goes
/// through the agent authentication middleware first.
pub fn create_router(state: AppState) -> Router {
    let agent_prefix = state.agent_routes.prefix().to_string();

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/live", get(health::live_check))
        .nest(&agent_prefix, agent::create_agent_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            agent_auth_middleware,
        ))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Create the router and expose Prometheus metrics when enabled
pub fn create_router_with_metrics(
    state: AppState,
    metrics: Option<PrometheusMetrics>,
    metrics_path: &str,
) -> Router {
    let router = create_router(state);

    match metrics {
        Some(metrics) => router.merge(create_metrics_router(metrics, metrics_path)),
        None => router,
    }
}
