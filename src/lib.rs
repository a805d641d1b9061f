//! Discovery Gateway
//!
//! A service registry that tracks instance leases, evicts instances that stop
//! renewing and switches to self-preservation when renewals collapse, plus a
//! reverse-proxy gateway that routes requests to live instances through a
//! filter pipeline with load balancing and retries.

pub mod api;
pub mod app;
pub mod config;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod registry;

pub use error::{AppError, Result};

use std::path::PathBuf;
use std::sync::Arc;

use gateway::filters::ApiKeyFilter;
use gateway::{GatewayMetrics, LoadBalancer, ProxyPipeline, RouteTable};
use registry::RegistryService;

/// State shared by the registry handlers
pub struct RegistryState {
    pub service: Arc<RegistryService>,
}

/// State shared by the gateway handlers
pub struct GatewayState {
    pub route_table: Arc<RouteTable>,
    pub pipeline: Arc<ProxyPipeline>,
    pub metrics: Arc<GatewayMetrics>,
    pub load_balancer: Arc<LoadBalancer>,
    /// File the route entries are reloaded from
    pub config_path: PathBuf,
    /// Key check for the admin endpoints, the same keys the proxy accepts
    pub admin_auth: Option<Arc<ApiKeyFilter>>,
}
