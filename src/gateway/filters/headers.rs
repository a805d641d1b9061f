//! Header manipulation filters

use async_trait::async_trait;
use axum::http::{header, HeaderName, HeaderValue};

use crate::error::Result;
use crate::gateway::filter::{FilterStage, GatewayFilter, RequestContext, REQUEST_ID_HEADER};

/// Propagates `X-Request-Id`, generating one when the client sent none
pub struct RequestIdFilter;

#[async_trait]
impl GatewayFilter for RequestIdFilter {
    fn name(&self) -> &str {
        "request_id"
    }

    fn stage(&self) -> FilterStage {
        FilterStage::Pre
    }

    fn order(&self) -> i32 {
        -200
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<()> {
        let incoming = ctx
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        if let Some(id) = incoming {
            ctx.request_id = id;
        }

        if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
            ctx.headers.insert(REQUEST_ID_HEADER, value.clone());
            ctx.response_headers.insert(REQUEST_ID_HEADER, value);
        }
        Ok(())
    }
}

/// Adds `X-Forwarded-For`, `X-Forwarded-Host` and `X-Forwarded-Proto`
pub struct ForwardedHeadersFilter;

#[async_trait]
impl GatewayFilter for ForwardedHeadersFilter {
    fn name(&self) -> &str {
        "forwarded_headers"
    }

    fn stage(&self) -> FilterStage {
        FilterStage::Pre
    }

    fn order(&self) -> i32 {
        10
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<()> {
        if let Some(addr) = ctx.client_addr {
            let forwarded_for = match ctx.headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
                Some(existing) => format!("{}, {}", existing, addr.ip()),
                None => addr.ip().to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
                ctx.headers.insert("x-forwarded-for", value);
            }
        }

        if let Some(host) = ctx.headers.get(header::HOST).cloned() {
            ctx.headers.insert("x-forwarded-host", host);
        }
        if !ctx.headers.contains_key("x-forwarded-proto") {
            let scheme = ctx.uri.scheme_str().unwrap_or("http").to_string();
            if let Ok(value) = HeaderValue::from_str(&scheme) {
                ctx.headers.insert("x-forwarded-proto", value);
            }
        }
        Ok(())
    }
}

/// Drops headers that must not reach upstream services
pub struct SensitiveHeadersFilter {
    headers: Vec<HeaderName>,
}

impl SensitiveHeadersFilter {
    pub fn new(names: &[String]) -> Self {
        Self {
            headers: names
                .iter()
                .filter_map(|n| HeaderName::from_bytes(n.trim().to_ascii_lowercase().as_bytes()).ok())
                .collect(),
        }
    }
}

#[async_trait]
impl GatewayFilter for SensitiveHeadersFilter {
    fn name(&self) -> &str {
        "sensitive_headers"
    }

    fn stage(&self) -> FilterStage {
        FilterStage::Pre
    }

    // After authentication has read the credentials
    fn order(&self) -> i32 {
        100
    }

    fn should_filter(&self, _ctx: &RequestContext) -> bool {
        !self.headers.is_empty()
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<()> {
        for name in &self.headers {
            ctx.headers.remove(name);
        }
        Ok(())
    }
}

/// Removes upstream response headers that describe the internal stack
pub struct HiddenResponseHeadersFilter {
    headers: Vec<HeaderName>,
}

impl HiddenResponseHeadersFilter {
    pub fn new(names: &[String]) -> Self {
        Self {
            headers: names
                .iter()
                .filter_map(|n| HeaderName::from_bytes(n.trim().to_ascii_lowercase().as_bytes()).ok())
                .collect(),
        }
    }
}

#[async_trait]
impl GatewayFilter for HiddenResponseHeadersFilter {
    fn name(&self) -> &str {
        "hidden_response_headers"
    }

    fn stage(&self) -> FilterStage {
        FilterStage::Post
    }

    fn should_filter(&self, ctx: &RequestContext) -> bool {
        !self.headers.is_empty() && ctx.response.is_some()
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<()> {
        if let Some(response) = ctx.response.as_mut() {
            for name in &self.headers {
                response.headers.remove(name);
            }
        }
        Ok(())
    }
}
