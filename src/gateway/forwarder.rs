//! Forwarding of requests to upstream instances

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::registry::ServiceInstance;

/// Request as sent to an upstream instance
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Path and query on the upstream
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Upstream response, buffered
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Failure of one forward attempt
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("upstream failed: {0}")]
    Other(String),
}

impl ForwardError {
    /// Whether another instance may be tried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connect(_))
    }

    /// Client-facing error; names the application, never the instance address
    pub fn into_app_error(self, service_id: &str) -> AppError {
        match self {
            Self::Timeout(_) => AppError::UpstreamTimeout(service_id.to_string()),
            Self::Connect(_) => AppError::UpstreamConnect(service_id.to_string()),
            Self::Other(_) => AppError::Upstream(service_id.to_string()),
        }
    }
}

/// Sends a request to one instance
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        target: &ServiceInstance,
        request: &ForwardRequest,
    ) -> std::result::Result<ProxyResponse, ForwardError>;
}

/// Headers that only apply to a single connection
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// reqwest-based forwarder
pub struct HttpForwarder {
    client: Client,
    timeout: Duration,
}

impl HttpForwarder {
    pub fn new(connect_timeout: Duration, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    fn classify(&self, error: reqwest::Error) -> ForwardError {
        if error.is_timeout() {
            ForwardError::Timeout(self.timeout)
        } else if error.is_connect() {
            ForwardError::Connect(error.to_string())
        } else {
            ForwardError::Other(error.to_string())
        }
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        target: &ServiceInstance,
        request: &ForwardRequest,
    ) -> std::result::Result<ProxyResponse, ForwardError> {
        let url = format!("http://{}{}", target.authority(), request.path_and_query);
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| ForwardError::Other(e.to_string()))?;

        let mut builder = self.client.request(method, &url).body(request.body.clone());
        for (name, value) in request.headers.iter() {
            if is_hop_by_hop(name.as_str()) || name == axum::http::header::HOST {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_bytes());
        }

        debug!(instance = %target.instance_id, path = %request.path_and_query, "Forwarding request");

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| ForwardError::Other(e.to_string()))?;

        let mut headers = HeaderMap::with_capacity(response.headers().len());
        for (name, value) in response.headers() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.append(name, value);
            }
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}
