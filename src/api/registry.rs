//! Registry HTTP handlers

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::error::{AppError, Result};
use crate::registry::RegisterRequest;
use crate::RegistryState;

/// Register an instance
pub async fn register(
    State(state): State<Arc<RegistryState>>,
    Path(app): Path<String>,
    body: Bytes,
) -> Result<StatusCode> {
    let request: RegisterRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("invalid registration body: {}", e)))?;
    let instance = state.service.register(&app, request)?;
    info!(app = %instance.app_name, instance = %instance.instance_id, "Instance registered");
    Ok(StatusCode::NO_CONTENT)
}

/// Renew an instance's lease
pub async fn renew(
    State(state): State<Arc<RegistryState>>,
    Path((app, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    state.service.renew(&app, &id)?;
    Ok(StatusCode::OK)
}

/// Cancel a registration; succeeds whether or not the instance exists
pub async fn cancel(
    State(state): State<Arc<RegistryState>>,
    Path((app, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    state.service.cancel(&app, &id)?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    value: Option<String>,
}

/// Override an instance's status
pub async fn update_status(
    State(state): State<Arc<RegistryState>>,
    Path((app, id)): Path<(String, String)>,
    Query(query): Query<StatusQuery>,
) -> Result<StatusCode> {
    let value = query
        .value
        .ok_or_else(|| AppError::Validation("missing 'value' query parameter".to_string()))?;
    state.service.update_status(&app, &id, &value)?;
    Ok(StatusCode::OK)
}

/// Instances of one application
pub async fn fetch(
    State(state): State<Arc<RegistryState>>,
    Path(app): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.service.fetch(&app)?))
}

/// Every application
pub async fn fetch_all(State(state): State<Arc<RegistryState>>) -> impl IntoResponse {
    Json(state.service.fetch_all())
}

/// Counts and self-preservation state
pub async fn info(State(state): State<Arc<RegistryState>>) -> impl IntoResponse {
    Json(state.service.info())
}

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "UP",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
