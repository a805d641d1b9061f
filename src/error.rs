//! Common error types for the registry and the gateway

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Instance {instance_id} of application {app_name} is not registered")]
    InstanceNotFound {
        app_name: String,
        instance_id: String,
    },

    #[error("Application not found: {0}")]
    ApplicationNotFound(String),

    #[error("No route matches path: {0}")]
    RouteNotFound(String),

    #[error("Service unavailable: no live instance of {0}")]
    NoLiveInstance(String),

    #[error("Service unavailable: routing data for {0} is stale")]
    StaleRoutes(String),

    #[error("Service unavailable: upstream of {0} timed out")]
    UpstreamTimeout(String),

    #[error("Service unavailable: could not connect to upstream of {0}")]
    UpstreamConnect(String),

    #[error("Bad gateway: upstream of {0} failed")]
    Upstream(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Status code, error type and machine readable code for the response body
    fn classify(&self) -> (StatusCode, &'static str, Option<&'static str>) {
        match self {
            AppError::Config(_) | AppError::Io(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None)
            }
            AppError::Json(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", Some("invalid_json")),
            AppError::HttpClient(_) | AppError::RegistryUnavailable(_) => {
                (StatusCode::BAD_GATEWAY, "registry_error", Some("registry_unavailable"))
            }
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", Some("invalid_input")),
            AppError::InstanceNotFound { .. } => (StatusCode::NOT_FOUND, "not_found_error", Some("instance_not_found")),
            AppError::ApplicationNotFound(_) => (StatusCode::NOT_FOUND, "not_found_error", Some("application_not_found")),
            AppError::RouteNotFound(_) => (StatusCode::NOT_FOUND, "not_found_error", Some("route_not_found")),
            AppError::NoLiveInstance(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable_error", Some("no_live_instance")),
            AppError::StaleRoutes(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable_error", Some("stale_routes")),
            AppError::UpstreamTimeout(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable_error", Some("upstream_timeout")),
            AppError::UpstreamConnect(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable_error", Some("upstream_connect_error")),
            AppError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error", None),
            AppError::AuthenticationFailed(_) => (StatusCode::UNAUTHORIZED, "authentication_error", Some("invalid_api_key")),
            AppError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "invalid_request_error", Some("payload_too_large")),
        }
    }

    /// HTTP status this error is reported with
    pub fn status_code(&self) -> StatusCode {
        self.classify().0
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = self.classify();

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: error_type.to_string(),
                code: code.map(|c| c.to_string()),
            },
        });

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
