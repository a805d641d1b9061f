//! Application assembly and lifecycle

use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::routes::{create_gateway_router, create_registry_router};
use crate::config::Settings;
use crate::discovery::{InstanceHeartbeat, LocalRegistrySource, RegistryClient, RegistrySource};
use crate::error::{AppError, Result};
use crate::gateway::filters::{default_chain, ApiKeyFilter};
use crate::gateway::{
    GatewayMetrics, HttpForwarder, LoadBalancer, LoadBalancingStrategy, PipelineConfig, ProxyPipeline, RouteTable,
    RouteTableConfig,
};
use crate::registry::{HeartbeatMonitor, MonitorConfig, RegistryService, RegistryStore};
use crate::{GatewayState, RegistryState};

/// Timeout of calls the gateway makes to a remote registry
const REGISTRY_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

struct RegistryParts {
    state: Arc<RegistryState>,
    monitor: Arc<HeartbeatMonitor>,
}

struct GatewayParts {
    state: Arc<GatewayState>,
    heartbeat: Option<InstanceHeartbeat>,
}

/// Registry and gateway wired together from settings
pub struct Application {
    settings: Settings,
    registry: Option<RegistryParts>,
    gateway: Option<GatewayParts>,
}

impl Application {
    /// Construct every component in dependency order
    pub fn build(settings: Settings, config_path: impl Into<PathBuf>) -> Result<Self> {
        let registry = settings.registry.enabled.then(|| {
            let store = Arc::new(RegistryStore::new());
            let monitor = Arc::new(HeartbeatMonitor::new(
                store.clone(),
                MonitorConfig::from_settings(&settings.registry),
            ));
            let service = Arc::new(
                RegistryService::new(store, settings.registry.default_lease_duration_secs)
                    .with_max_lease_duration(settings.registry.max_lease_duration_secs),
            );
            RegistryParts {
                state: Arc::new(RegistryState { service }),
                monitor,
            }
        });

        let gateway = if settings.gateway.enabled {
            Some(build_gateway(&settings, registry.as_ref(), config_path.into())?)
        } else {
            None
        };

        Ok(Self {
            settings,
            registry,
            gateway,
        })
    }

    pub fn registry_router(&self) -> Option<Router> {
        self.registry
            .as_ref()
            .map(|r| create_registry_router(r.state.clone()))
    }

    pub fn gateway_router(&self) -> Option<Router> {
        self.gateway
            .as_ref()
            .map(|g| create_gateway_router(g.state.clone()))
    }

    /// Serve until Ctrl-C
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve until `shutdown` resolves, then drain connections and stop background tasks
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut servers: Vec<(&'static str, JoinHandle<std::io::Result<()>>)> = Vec::new();

        if let Some(registry) = &self.registry {
            let addr = format!("{}:{}", self.settings.registry.host, self.settings.registry.port);
            let listener = TcpListener::bind(&addr).await?;
            info!(addr = %addr, "Registry listening");

            registry.monitor.start().await;
            let router = create_registry_router(registry.state.clone());
            let signal = wait_for(shutdown_rx.clone());
            servers.push((
                "registry",
                tokio::spawn(async move { axum::serve(listener, router).with_graceful_shutdown(signal).await }),
            ));
        }

        if let Some(gateway) = &self.gateway {
            let addr = format!("{}:{}", self.settings.gateway.host, self.settings.gateway.port);
            let listener = TcpListener::bind(&addr).await?;
            info!(addr = %addr, routes = gateway.state.route_table.routes().len(), "Gateway listening");

            gateway.state.route_table.start().await;
            let service = create_gateway_router(gateway.state.clone())
                .into_make_service_with_connect_info::<SocketAddr>();
            let signal = wait_for(shutdown_rx.clone());
            servers.push((
                "gateway",
                tokio::spawn(async move { axum::serve(listener, service).with_graceful_shutdown(signal).await }),
            ));

            if let Some(heartbeat) = &gateway.heartbeat {
                heartbeat.start().await;
            }
        }

        shutdown.await;
        info!("Shutting down");

        // Deregister while the registry is still serving
        if let Some(heartbeat) = self.gateway.as_ref().and_then(|g| g.heartbeat.as_ref()) {
            heartbeat.stop().await;
        }

        let _ = shutdown_tx.send(true);
        for (name, server) in servers {
            match server.await {
                Ok(Ok(())) => info!(server = name, "Server stopped"),
                Ok(Err(e)) => warn!(server = name, error = %e, "Server exited with error"),
                Err(e) => warn!(server = name, error = %e, "Server task failed"),
            }
        }

        if let Some(gateway) = &self.gateway {
            gateway.state.route_table.stop().await;
        }
        if let Some(registry) = &self.registry {
            registry.monitor.stop().await;
        }
        Ok(())
    }
}

fn build_gateway(settings: &Settings, registry: Option<&RegistryParts>, config_path: PathBuf) -> Result<GatewayParts> {
    let config = &settings.gateway;

    let source: Arc<dyn RegistrySource> = match (&config.registry_url, registry) {
        (Some(url), _) => {
            info!(registry = %url, "Gateway reads a remote registry");
            Arc::new(RegistryClient::new(url, REGISTRY_CLIENT_TIMEOUT)?)
        }
        (None, Some(parts)) => Arc::new(LocalRegistrySource::new(parts.state.service.clone())),
        (None, None) => {
            return Err(AppError::Validation(
                "gateway.registry_url is required when the local registry is disabled".to_string(),
            ))
        }
    };

    let strategy = LoadBalancingStrategy::parse(&config.load_balancing)
        .ok_or_else(|| AppError::Validation(format!("unknown load balancing strategy '{}'", config.load_balancing)))?;
    let load_balancer = Arc::new(LoadBalancer::new(strategy));
    let metrics = Arc::new(GatewayMetrics::new());

    let route_table = Arc::new(
        RouteTable::new(source, &config.routes, RouteTableConfig::from_settings(config))
            .with_listener(load_balancer.clone())
            .with_listener(metrics.clone()),
    );

    let forwarder = Arc::new(HttpForwarder::new(
        Duration::from_millis(config.connect_timeout_ms),
        Duration::from_millis(config.forward_timeout_ms),
    )?);

    let pipeline = Arc::new(ProxyPipeline::new(
        route_table.clone(),
        load_balancer.clone(),
        forwarder,
        default_chain(config),
        metrics.clone(),
        PipelineConfig::from_settings(config),
    ));

    let heartbeat = match &config.self_registration {
        Some(registration) => {
            let url = config
                .registry_url
                .clone()
                .unwrap_or_else(|| format!("http://127.0.0.1:{}", settings.registry.port));
            let client = Arc::new(RegistryClient::new(&url, REGISTRY_CLIENT_TIMEOUT)?);
            Some(InstanceHeartbeat::from_config(client, registration))
        }
        None => None,
    };

    Ok(GatewayParts {
        state: Arc::new(GatewayState {
            route_table,
            pipeline,
            metrics,
            load_balancer,
            config_path,
            admin_auth: ApiKeyFilter::from_config(&config.auth).map(Arc::new),
        }),
        heartbeat,
    })
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
