//! Gateway admin handlers and the proxy fallback

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::Result;
use crate::gateway::FilterStage;
use crate::GatewayState;

/// Reject admin requests without a valid API key when authentication is enabled
pub async fn require_api_key(State(state): State<Arc<GatewayState>>, request: Request, next: Next) -> Response {
    if let Some(auth) = &state.admin_auth {
        if let Err(e) = auth.verify(request.headers()) {
            warn!(path = %request.uri().path(), "Rejected admin request without a valid API key");
            return e.into_response();
        }
    }
    next.run(request).await
}

/// Route table freshness
pub async fn health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let snapshot = state.route_table.snapshot();
    let stale = state.route_table.is_stale();
    let age = Instant::now().saturating_duration_since(snapshot.refreshed_at);

    let status_code = if stale {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let response = json!({
        "status": if stale { "STALE" } else { "UP" },
        "routes": snapshot.routes.entries().len(),
        "services": snapshot.service_count(),
        "snapshot_version": snapshot.version,
        "snapshot_age_secs": age.as_secs(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    (status_code, Json(response))
}

/// Effective route entries
pub async fn list_routes(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({ "routes": state.route_table.routes() }))
}

/// Re-read route entries from the configuration file and refresh the table
pub async fn reload_routes(State(state): State<Arc<GatewayState>>) -> Result<impl IntoResponse> {
    let settings = Settings::load_from_path(&state.config_path)?;
    state.route_table.reload_routes(&settings.gateway.routes);

    let refreshed = match state.route_table.refresh().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Refresh after route reload failed");
            false
        }
    };
    info!(routes = settings.gateway.routes.len(), refreshed, "Routes reloaded");

    Ok(Json(json!({
        "routes": state.route_table.routes(),
        "refreshed": refreshed,
    })))
}

/// Request counters and load balancing strategy
pub async fn metrics(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "metrics": state.metrics.snapshot(),
        "load_balancing": state.load_balancer.strategy(),
        "filters": {
            "pre": state.pipeline.filters().names(FilterStage::Pre),
            "post": state.pipeline.filters().names(FilterStage::Post),
            "error": state.pipeline.filters().names(FilterStage::Error),
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Everything that is not an admin endpoint goes through the pipeline
pub async fn proxy(State(state): State<Arc<GatewayState>>, request: Request<Body>) -> Response {
    state.pipeline.handle(request).await
}
