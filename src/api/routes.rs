//! Router construction for the registry and gateway listeners

use axum::{
    middleware,
    routing::{get, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api::{gateway, registry};
use crate::{GatewayState, RegistryState};

/// Registry API router
pub fn create_registry_router(state: Arc<RegistryState>) -> Router {
    Router::new()
        .route("/health", get(registry::health))
        .route("/eureka/status", get(registry::info))
        .route("/eureka/apps", get(registry::fetch_all))
        .route(
            "/eureka/apps/:app",
            get(registry::fetch).post(registry::register),
        )
        .route(
            "/eureka/apps/:app/:id",
            put(registry::renew).delete(registry::cancel),
        )
        .route("/eureka/apps/:app/:id/status", put(registry::update_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Gateway router: admin endpoints, everything else proxied
///
/// Route listing, reload and metrics take the proxy's API keys; health stays
/// open for probes.
pub fn create_gateway_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(
            "/actuator/routes",
            get(gateway::list_routes).post(gateway::reload_routes),
        )
        .route("/actuator/metrics", get(gateway::metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), gateway::require_api_key))
        .route("/actuator/health", get(gateway::health))
        .fallback(gateway::proxy)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
