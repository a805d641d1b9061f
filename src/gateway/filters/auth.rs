//! API key authentication filter

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use std::collections::HashSet;
use tracing::warn;

use crate::config::AuthConfig;
use crate::error::{AppError, Result};
use crate::gateway::filter::{FilterStage, GatewayFilter, RequestContext};

const API_KEY_HEADER: &str = "x-api-key";

/// Rejects requests without a known API key
pub struct ApiKeyFilter {
    api_keys: HashSet<String>,
}

impl ApiKeyFilter {
    pub fn new(api_keys: Vec<String>) -> Self {
        Self {
            api_keys: api_keys.into_iter().collect(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Option<Self> {
        config.enabled.then(|| Self::new(config.api_keys.clone()))
    }

    fn extract_key(headers: &HeaderMap) -> Option<String> {
        if let Some(value) = headers.get(API_KEY_HEADER).and_then(|h| h.to_str().ok()) {
            return Some(value.trim().to_string());
        }

        headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(|h| h.strip_prefix("Bearer ").unwrap_or(h).trim().to_string())
    }

    /// Check the key carried by `headers`; every request passes when no keys are configured
    pub fn verify(&self, headers: &HeaderMap) -> Result<()> {
        if self.api_keys.is_empty() {
            return Ok(());
        }
        match Self::extract_key(headers) {
            Some(key) if self.api_keys.contains(&key) => Ok(()),
            Some(_) => Err(AppError::AuthenticationFailed("Invalid API key".to_string())),
            None => Err(AppError::AuthenticationFailed(
                "API key required. Provide via Authorization header: 'Bearer YOUR_API_KEY'".to_string(),
            )),
        }
    }
}

#[async_trait]
impl GatewayFilter for ApiKeyFilter {
    fn name(&self) -> &str {
        "api_key"
    }

    fn stage(&self) -> FilterStage {
        FilterStage::Pre
    }

    fn order(&self) -> i32 {
        -100
    }

    // If no API keys are configured, allow all requests
    fn should_filter(&self, _ctx: &RequestContext) -> bool {
        !self.api_keys.is_empty()
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<()> {
        self.verify(&ctx.headers).map_err(|e| {
            warn!(request_id = %ctx.request_id, reason = %e, "Rejected request without a valid API key");
            e
        })
    }
}
