//! Gateway module - routing, load balancing, filters and forwarding

pub mod filter;
pub mod filters;
pub mod forwarder;
pub mod load_balancer;
pub mod metrics;
pub mod pipeline;
pub mod route;
pub mod route_table;

pub use filter::{FilterChain, FilterStage, GatewayFilter, RequestContext};
pub use forwarder::{Forwarder, HttpForwarder};
pub use load_balancer::{LoadBalancer, LoadBalancingStrategy};
pub use metrics::GatewayMetrics;
pub use pipeline::{PipelineConfig, ProxyPipeline, RetryPolicy};
pub use route_table::{RouteTable, RouteTableConfig, SnapshotListener};
