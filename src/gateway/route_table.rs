//! Route table: routes plus live instances, refreshed from the registry

use arc_swap::ArcSwap;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{GatewayConfig, RouteConfig};
use crate::discovery::RegistrySource;
use crate::error::{AppError, Result};
use crate::gateway::route::{ResolvedRoute, RouteEntry, RouteOrigin, RouteSet};
use crate::registry::instance::{normalize_app_name, InstanceView, ServiceInstance};

/// Upper bound on the local deadline of a fetched lease
const MAX_LOCAL_LEASE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Instance eligible for traffic, with its lease deadline on the local clock
#[derive(Debug, Clone, PartialEq)]
pub struct LiveInstance {
    pub instance: ServiceInstance,
    pub expires_at: Instant,
}

impl LiveInstance {
    /// `None` when the deadline cannot be represented on the local clock
    fn from_view(view: InstanceView, fetched_at: Instant) -> Option<Self> {
        let expires_at = fetched_at.checked_add(view.remaining_lease().min(MAX_LOCAL_LEASE))?;
        Some(Self {
            instance: view.instance,
            expires_at,
        })
    }

    pub fn id(&self) -> &str {
        &self.instance.instance_id
    }

    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Immutable routing state; replaced as a whole on every change
#[derive(Debug)]
pub struct RouteSnapshot {
    pub routes: RouteSet,
    services: HashMap<String, Arc<Vec<LiveInstance>>>,
    /// Time of the last successful registry poll
    pub refreshed_at: Instant,
    pub version: u64,
}

impl RouteSnapshot {
    fn empty(routes: RouteSet) -> Self {
        Self {
            routes,
            services: HashMap::new(),
            refreshed_at: Instant::now(),
            version: 0,
        }
    }

    /// Instances of an application as of the last refresh
    pub fn instances(&self, service_id: &str) -> Option<&Arc<Vec<LiveInstance>>> {
        self.services.get(&normalize_app_name(service_id))
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn contains_service(&self, service_id: &str) -> bool {
        self.services.contains_key(service_id)
    }

    /// Whether `instance_id` of `service_id` is part of this snapshot
    pub fn contains_instance(&self, service_id: &str, instance_id: &str) -> bool {
        self.services
            .get(service_id)
            .is_some_and(|instances| instances.iter().any(|i| i.id() == instance_id))
    }

    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        now.saturating_duration_since(self.refreshed_at) > threshold
    }
}

/// Route table configuration
#[derive(Debug, Clone)]
pub struct RouteTableConfig {
    pub refresh_interval: Duration,
    pub staleness_threshold: Duration,
    pub auto_routes: bool,
}

impl RouteTableConfig {
    pub fn from_settings(config: &GatewayConfig) -> Self {
        Self {
            refresh_interval: Duration::from_secs(config.refresh_interval_secs),
            staleness_threshold: Duration::from_secs(config.staleness_threshold_secs),
            auto_routes: config.auto_routes,
        }
    }
}

/// Per-instance state kept outside the table, pruned to each new snapshot
pub trait SnapshotListener: Send + Sync {
    fn snapshot_installed(&self, snapshot: &RouteSnapshot);
}

/// Gateway-side cache of routes and live instances
pub struct RouteTable {
    source: Arc<dyn RegistrySource>,
    config: RouteTableConfig,
    snapshot: ArcSwap<RouteSnapshot>,
    listeners: Vec<Arc<dyn SnapshotListener>>,
    refresh_task: RwLock<Option<JoinHandle<()>>>,
}

impl RouteTable {
    pub fn new(source: Arc<dyn RegistrySource>, routes: &[RouteConfig], config: RouteTableConfig) -> Self {
        Self {
            source,
            config,
            snapshot: ArcSwap::from_pointee(RouteSnapshot::empty(RouteSet::from_config(routes))),
            listeners: Vec::new(),
            refresh_task: RwLock::new(None),
        }
    }

    /// Notify `listener` after every registry poll that installs a snapshot
    pub fn with_listener(mut self, listener: Arc<dyn SnapshotListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Current snapshot; stays valid for as long as the caller holds it
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.snapshot.load_full()
    }

    /// Effective route entries
    pub fn routes(&self) -> Vec<RouteEntry> {
        self.snapshot.load().routes.entries().to_vec()
    }

    pub fn is_stale(&self) -> bool {
        self.snapshot
            .load()
            .is_stale(Instant::now(), self.config.staleness_threshold)
    }

    /// Resolve a request path to a route and the live instances behind it
    pub fn resolve(&self, path: &str) -> Result<(ResolvedRoute, Vec<LiveInstance>)> {
        let snapshot = self.snapshot.load();
        let route = snapshot
            .routes
            .resolve(path)
            .ok_or_else(|| AppError::RouteNotFound(path.to_string()))?;

        let now = Instant::now();
        if snapshot.is_stale(now, self.config.staleness_threshold) {
            return Err(AppError::StaleRoutes(route.service_id));
        }

        let live: Vec<LiveInstance> = snapshot
            .instances(&route.service_id)
            .map(|instances| {
                instances
                    .iter()
                    .filter(|i| i.is_live(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if live.is_empty() {
            return Err(AppError::NoLiveInstance(route.service_id));
        }
        Ok((route, live))
    }

    /// Replace the configured routes, keeping discovered ones and instance data
    pub fn reload_routes(&self, routes: &[RouteConfig]) {
        let configured: Vec<RouteEntry> = routes.iter().map(RouteEntry::from_config).collect();
        self.snapshot.rcu(|current| {
            let discovered = current
                .routes
                .entries()
                .iter()
                .filter(|e| e.origin == RouteOrigin::Discovered)
                .cloned()
                .collect();
            RouteSnapshot {
                routes: RouteSet::new(configured.clone(), discovered),
                services: current.services.clone(),
                refreshed_at: current.refreshed_at,
                version: current.version + 1,
            }
        });
        info!(routes = routes.len(), "Reloaded route entries");
    }

    /// Poll the registry once and swap in a new snapshot.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<()> {
        let fetched_at = Instant::now();

        let (fetched, discovered) = if self.config.auto_routes {
            let applications = self.source.fetch_all().await?.applications;
            let discovered: Vec<RouteEntry> = applications
                .iter()
                .map(|app| RouteEntry::discovered(&app.name))
                .collect();
            let fetched: HashMap<String, Vec<InstanceView>> = applications
                .into_iter()
                .map(|app| (normalize_app_name(&app.name), app.instances))
                .collect();
            (fetched, Some(discovered))
        } else {
            let service_ids: Vec<String> = self.snapshot.load().routes.service_ids().into_iter().collect();
            let results = join_all(service_ids.iter().map(|id| self.source.fetch_app(id))).await;

            let mut fetched = HashMap::with_capacity(service_ids.len());
            for (service_id, result) in service_ids.into_iter().zip(results) {
                fetched.insert(service_id, result?.unwrap_or_default());
            }
            (fetched, None)
        };

        let mut services = HashMap::with_capacity(fetched.len());
        let mut live_total = 0;
        for (service_id, views) in fetched {
            let live: Vec<LiveInstance> = views
                .into_iter()
                .filter(InstanceView::is_eligible)
                .filter_map(|view| {
                    let instance_id = view.instance.instance_id.clone();
                    let live = LiveInstance::from_view(view, fetched_at);
                    if live.is_none() {
                        warn!(service = %service_id, instance = %instance_id, "Lease deadline out of range, skipping instance");
                    }
                    live
                })
                .collect();
            live_total += live.len();
            services.insert(service_id, Arc::new(live));
        }

        let previous = self.snapshot.rcu(|current| {
            let routes = match &discovered {
                Some(discovered) => RouteSet::new(current.routes.configured(), discovered.clone()),
                None => current.routes.clone(),
            };
            RouteSnapshot {
                routes,
                services: services.clone(),
                refreshed_at: fetched_at,
                version: current.version + 1,
            }
        });

        debug!(
            version = previous.version + 1,
            services = services.len(),
            live_instances = live_total,
            "Installed new route snapshot"
        );

        let installed = self.snapshot.load();
        for listener in &self.listeners {
            listener.snapshot_installed(&installed);
        }
        Ok(())
    }

    /// Start polling the registry in the background
    pub async fn start(self: &Arc<Self>) {
        let table = self.clone();
        let period = self.config.refresh_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = table.refresh().await {
                    let age = Instant::now().saturating_duration_since(table.snapshot().refreshed_at);
                    warn!(
                        error = %e,
                        snapshot_age_secs = age.as_secs(),
                        stale = table.is_stale(),
                        "Registry poll failed, keeping last known routes"
                    );
                }
            }
        });

        if let Some(previous) = self.refresh_task.write().await.replace(handle) {
            previous.abort();
        }
        info!(interval_secs = period.as_secs(), "Started route table refresh");
    }

    /// Stop the background refresh task
    pub async fn stop(&self) {
        if let Some(handle) = self.refresh_task.write().await.take() {
            handle.abort();
            info!("Stopped route table refresh");
        }
    }
}
