//! Proxy pipeline
//!
//! Every gateway request walks the same stages:
//!
//! ```text
//! PreFilter -> RouteResolve -> Forward -> PostFilter -> Complete
//!     \            \              \           \
//!      `------------`--------------`-----------`--> Error
//! ```
//!
//! The error stage runs the error filters, then the error itself becomes the
//! client response. Forwarding holds no route-table state while awaiting the
//! upstream: candidates are copied out of the snapshot during resolution.

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{GatewayConfig, RetryConfig};
use crate::error::{AppError, Result};
use crate::gateway::filter::{FilterChain, FilterStage, RequestContext};
use crate::gateway::forwarder::{ForwardError, Forwarder, ProxyResponse};
use crate::gateway::load_balancer::LoadBalancer;
use crate::gateway::metrics::GatewayMetrics;
use crate::gateway::route_table::{LiveInstance, RouteTable};

/// Pipeline stage of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PreFilter,
    RouteResolve,
    Forward,
    PostFilter,
    Complete,
    Error,
}

/// When a failed forward may be tried again
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first
    pub max_retries: u32,
    /// Retry non-idempotent methods too
    pub retry_all_methods: bool,
}

impl RetryPolicy {
    pub fn from_settings(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_all_methods: config.retry_all_methods,
        }
    }

    pub fn allows(&self, method: &Method) -> bool {
        self.retry_all_methods
            || matches!(
                *method,
                Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
            )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_all_methods: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bound on a single forward attempt
    pub forward_timeout: Duration,
    pub max_body_bytes: usize,
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    pub fn from_settings(config: &GatewayConfig) -> Self {
        Self {
            forward_timeout: Duration::from_millis(config.forward_timeout_ms),
            max_body_bytes: config.max_body_bytes,
            retry: RetryPolicy::from_settings(&config.retry),
        }
    }
}

/// Runs requests through filters, route resolution and forwarding
pub struct ProxyPipeline {
    route_table: Arc<RouteTable>,
    load_balancer: Arc<LoadBalancer>,
    forwarder: Arc<dyn Forwarder>,
    filters: FilterChain,
    metrics: Arc<GatewayMetrics>,
    config: PipelineConfig,
}

impl ProxyPipeline {
    pub fn new(
        route_table: Arc<RouteTable>,
        load_balancer: Arc<LoadBalancer>,
        forwarder: Arc<dyn Forwarder>,
        filters: FilterChain,
        metrics: Arc<GatewayMetrics>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            route_table,
            load_balancer,
            forwarder,
            filters,
            metrics,
            config,
        }
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    /// Handle one client request end to end
    pub async fn handle(&self, request: Request<Body>) -> Response {
        match RequestContext::from_request(request, self.config.max_body_bytes).await {
            Ok(ctx) => self.execute(ctx).await.into_response(),
            Err(e) => {
                self.metrics.record_request(true);
                e.into_response()
            }
        }
    }

    /// Drive a context through the stages until it completes or fails
    pub async fn execute(&self, mut ctx: RequestContext) -> RequestContext {
        let mut candidates: Vec<LiveInstance> = Vec::new();
        let mut stage = Stage::PreFilter;

        loop {
            debug!(request_id = %ctx.request_id, stage = ?stage, "Pipeline stage");
            stage = match stage {
                Stage::PreFilter => match self.filters.run(FilterStage::Pre, &mut ctx).await {
                    Ok(()) => Stage::RouteResolve,
                    Err(e) => fail(&mut ctx, e),
                },
                Stage::RouteResolve => match self.route_table.resolve(ctx.path()) {
                    Ok((route, live)) => {
                        ctx.route = Some(route);
                        candidates = live;
                        Stage::Forward
                    }
                    Err(e) => fail(&mut ctx, e),
                },
                Stage::Forward => match self.forward(&mut ctx, &candidates).await {
                    Ok(response) => {
                        ctx.response = Some(response);
                        Stage::PostFilter
                    }
                    Err(e) => fail(&mut ctx, e),
                },
                Stage::PostFilter => match self.filters.run(FilterStage::Post, &mut ctx).await {
                    Ok(()) => Stage::Complete,
                    Err(e) => fail(&mut ctx, e),
                },
                Stage::Error => {
                    self.filters.run_error(&mut ctx).await;
                    break;
                }
                Stage::Complete => break,
            };
        }

        self.metrics.record_request(ctx.error.is_some());
        if ctx.error.is_none() {
            info!(
                request_id = %ctx.request_id,
                method = %ctx.method,
                path = %ctx.path(),
                service = ctx.route.as_ref().map(|r| r.service_id.as_str()).unwrap_or("-"),
                instance = ctx.instance_id.as_deref().unwrap_or("-"),
                status = ctx.response.as_ref().map(|r| r.status.as_u16()).unwrap_or(0),
                attempts = ctx.attempts,
                elapsed_ms = ctx.started_at.elapsed().as_millis() as u64,
                "Request completed"
            );
        }
        ctx
    }

    /// Forward to one instance, retrying retryable failures on another
    async fn forward(&self, ctx: &mut RequestContext, candidates: &[LiveInstance]) -> Result<ProxyResponse> {
        let route = ctx
            .route
            .clone()
            .ok_or_else(|| AppError::Internal("forward without a resolved route".to_string()))?;
        let request = ctx.forward_request(&route);
        let method_retryable = self.config.retry.allows(&ctx.method);

        let mut tried: Vec<String> = Vec::new();
        let mut last_error: Option<ForwardError> = None;

        while let Some(target) = self.load_balancer.select(&route.service_id, candidates, &tried) {
            if !tried.is_empty() {
                self.metrics.record_retry();
                info!(
                    request_id = %ctx.request_id,
                    service = %route.service_id,
                    instance = %target.id(),
                    attempt = tried.len() + 1,
                    "Retrying on another instance"
                );
            }
            tried.push(target.id().to_string());
            ctx.attempts += 1;

            let started = Instant::now();
            let outcome = {
                let _guard = self.load_balancer.acquire(&route.service_id, &target);
                match tokio::time::timeout(
                    self.config.forward_timeout,
                    self.forwarder.forward(&target.instance, &request),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ForwardError::Timeout(self.config.forward_timeout)),
                }
            };
            self.metrics
                .record_attempt(&route.service_id, target.id(), started.elapsed(), outcome.is_err());

            match outcome {
                Ok(response) => {
                    ctx.instance_id = Some(target.id().to_string());
                    return Ok(response);
                }
                Err(error) => {
                    warn!(
                        request_id = %ctx.request_id,
                        service = %route.service_id,
                        instance = %target.id(),
                        error = %error,
                        "Forward attempt failed"
                    );
                    let retry = error.is_retryable()
                        && method_retryable
                        && tried.len() <= self.config.retry.max_retries as usize;
                    if !retry {
                        return Err(error.into_app_error(&route.service_id));
                    }
                    last_error = Some(error);
                }
            }
        }

        // Every candidate has been tried
        Err(match last_error {
            Some(error) => error.into_app_error(&route.service_id),
            None => AppError::NoLiveInstance(route.service_id),
        })
    }
}

fn fail(ctx: &mut RequestContext, error: AppError) -> Stage {
    ctx.error = Some(error);
    Stage::Error
}
