//! Gateway filters and the per-request context they operate on

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, Uri};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::gateway::forwarder::{ForwardRequest, ProxyResponse};
use crate::gateway::route::ResolvedRoute;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Stage a filter runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterStage {
    /// Before route resolution; may reject the request
    Pre,
    /// After a successful forward; may rewrite the response
    Post,
    /// After any failure
    Error,
}

/// State of one request as it moves through the pipeline
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_addr: Option<SocketAddr>,
    pub route: Option<ResolvedRoute>,
    /// Instance that produced the response
    pub instance_id: Option<String>,
    pub attempts: u32,
    pub response: Option<ProxyResponse>,
    pub error: Option<AppError>,
    /// Added to the client response whatever the outcome
    pub response_headers: HeaderMap,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            method,
            uri,
            headers,
            body,
            client_addr: None,
            route: None,
            instance_id: None,
            attempts: 0,
            response: None,
            error: None,
            response_headers: HeaderMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Buffer an incoming request into a context
    pub async fn from_request(request: Request<Body>, max_body_bytes: usize) -> Result<Self> {
        let (parts, body) = request.into_parts();

        let declared_length = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared_length.is_some_and(|len| len > max_body_bytes) {
            return Err(AppError::PayloadTooLarge(max_body_bytes));
        }

        let body = axum::body::to_bytes(body, max_body_bytes)
            .await
            .map_err(|_| AppError::PayloadTooLarge(max_body_bytes))?;

        let mut context = Self::new(parts.method, parts.uri, parts.headers, body);
        context.client_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        Ok(context)
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Request for the upstream of the resolved route
    pub fn forward_request(&self, route: &ResolvedRoute) -> ForwardRequest {
        let path_and_query = match self.uri.query() {
            Some(query) => format!("{}?{}", route.forward_path, query),
            None => route.forward_path.clone(),
        };

        let mut headers = self.headers.clone();
        if route.forward_path != self.path() && !route.matched_prefix.is_empty() {
            if let Ok(prefix) = HeaderValue::from_str(&route.matched_prefix) {
                headers.insert("x-forwarded-prefix", prefix);
            }
        }

        ForwardRequest {
            method: self.method.clone(),
            path_and_query,
            headers,
            body: self.body.clone(),
        }
    }

    /// Final client response: the upstream response or the error
    pub fn into_response(self) -> Response {
        let mut response = match (self.error, self.response) {
            (Some(error), _) => error.into_response(),
            (None, Some(upstream)) => {
                let mut response = Response::new(Body::from(upstream.body));
                *response.status_mut() = upstream.status;
                *response.headers_mut() = upstream.headers;
                response
            }
            (None, None) => AppError::Internal("request finished without a response".to_string())
                .into_response(),
        };

        for (name, value) in self.response_headers.iter() {
            response.headers_mut().insert(name.clone(), value.clone());
        }
        response
    }
}

/// A pluggable step of the pipeline
#[async_trait]
pub trait GatewayFilter: Send + Sync {
    fn name(&self) -> &str;

    fn stage(&self) -> FilterStage;

    /// Lower orders run first within a stage
    fn order(&self) -> i32 {
        0
    }

    fn should_filter(&self, _ctx: &RequestContext) -> bool {
        true
    }

    /// An error from a pre or post filter moves the request to the error stage
    async fn run(&self, ctx: &mut RequestContext) -> Result<()>;
}

/// Filters registered at startup, kept sorted by order
#[derive(Default, Clone)]
pub struct FilterChain {
    filters: Vec<Arc<dyn GatewayFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: impl GatewayFilter + 'static) -> Self {
        self.register(Arc::new(filter));
        self
    }

    pub fn register(&mut self, filter: Arc<dyn GatewayFilter>) {
        self.filters.push(filter);
        // Stable sort keeps registration order for equal orders
        self.filters.sort_by_key(|f| f.order());
    }

    /// Names of the filters of a stage, in run order
    pub fn names(&self, stage: FilterStage) -> Vec<String> {
        self.filters
            .iter()
            .filter(|f| f.stage() == stage)
            .map(|f| f.name().to_string())
            .collect()
    }

    /// Run the filters of a stage; stops at the first error
    pub async fn run(&self, stage: FilterStage, ctx: &mut RequestContext) -> Result<()> {
        for filter in self.filters.iter().filter(|f| f.stage() == stage) {
            if filter.should_filter(ctx) {
                filter.run(ctx).await?;
            }
        }
        Ok(())
    }

    /// Run error filters; their own failures are logged and ignored
    pub async fn run_error(&self, ctx: &mut RequestContext) {
        for filter in self.filters.iter().filter(|f| f.stage() == FilterStage::Error) {
            if !filter.should_filter(ctx) {
                continue;
            }
            if let Err(e) = filter.run(ctx).await {
                warn!(filter = %filter.name(), error = %e, "Error filter failed");
            }
        }
    }
}
