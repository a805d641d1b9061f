//! Load balancer implementation with multiple strategies

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::gateway::route_table::{LiveInstance, RouteSnapshot, SnapshotListener};

/// Load balancing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Round-robin distribution
    #[default]
    RoundRobin,
    /// Weighted round-robin based on the `weight` metadata of instances
    WeightedRoundRobin,
    /// Random selection
    Random,
    /// Instance with the fewest in-flight requests
    LeastConnections,
}

impl LoadBalancingStrategy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" => Some(Self::RoundRobin),
            "weighted_round_robin" | "weighted" => Some(Self::WeightedRoundRobin),
            "random" => Some(Self::Random),
            "least_connections" => Some(Self::LeastConnections),
            _ => None,
        }
    }
}

/// State for weighted round-robin algorithm
#[derive(Default)]
struct WeightedRoundRobinState {
    current_index: usize,
    current_weight: i32,
}

/// In-flight request on an instance; released on drop
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Picks one instance of an application per forward attempt
pub struct LoadBalancer {
    strategy: RwLock<LoadBalancingStrategy>,
    round_robin_index: DashMap<String, AtomicUsize>,
    weighted_state: DashMap<String, WeightedRoundRobinState>,
    active_connections: DashMap<String, Arc<AtomicUsize>>,
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(LoadBalancingStrategy::default())
    }
}

impl LoadBalancer {
    /// Create a new load balancer
    pub fn new(strategy: LoadBalancingStrategy) -> Self {
        Self {
            strategy: RwLock::new(strategy),
            round_robin_index: DashMap::new(),
            weighted_state: DashMap::new(),
            active_connections: DashMap::new(),
        }
    }

    /// Set the load balancing strategy
    pub fn set_strategy(&self, strategy: LoadBalancingStrategy) {
        *self.strategy.write() = strategy;
    }

    /// Get the current load balancing strategy
    pub fn strategy(&self) -> LoadBalancingStrategy {
        *self.strategy.read()
    }

    /// Select an instance of `service_id`, skipping the ids in `exclude`
    pub fn select(
        &self,
        service_id: &str,
        candidates: &[LiveInstance],
        exclude: &[String],
    ) -> Option<LiveInstance> {
        let mut eligible: Vec<&LiveInstance> = candidates
            .iter()
            .filter(|c| !exclude.iter().any(|id| id == c.id()))
            .collect();
        if eligible.is_empty() {
            return None;
        }
        // Snapshot order is arbitrary; rotate over a stable order
        eligible.sort_by(|a, b| a.id().cmp(b.id()));

        let strategy = self.strategy();
        let selected = match strategy {
            LoadBalancingStrategy::RoundRobin => self.select_round_robin(service_id, &eligible),
            LoadBalancingStrategy::WeightedRoundRobin => {
                self.select_weighted_round_robin(service_id, &eligible)
            }
            LoadBalancingStrategy::Random => select_random(&eligible),
            LoadBalancingStrategy::LeastConnections => {
                self.select_least_connections(service_id, &eligible)
            }
        };

        debug!(
            service = %service_id,
            instance = %selected.id(),
            strategy = ?strategy,
            "Selected instance for request"
        );

        Some(selected.clone())
    }

    /// Track an in-flight request on `instance`
    pub fn acquire(&self, service_id: &str, instance: &LiveInstance) -> ConnectionGuard {
        let counter = self
            .active_connections
            .entry(connection_key(service_id, instance.id()))
            .or_default()
            .clone();
        counter.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard { counter }
    }

    /// In-flight requests on an instance
    pub fn active_connections(&self, service_id: &str, instance_id: &str) -> usize {
        self.active_connections
            .get(&connection_key(service_id, instance_id))
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Instances with an in-flight counter
    pub fn tracked_instances(&self) -> usize {
        self.active_connections.len()
    }

    /// Round-robin selection
    fn select_round_robin<'a>(&self, service_id: &str, instances: &[&'a LiveInstance]) -> &'a LiveInstance {
        let index = self
            .round_robin_index
            .entry(service_id.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
        instances[index % instances.len()]
    }

    /// Weighted round-robin selection
    fn select_weighted_round_robin<'a>(
        &self,
        service_id: &str,
        instances: &[&'a LiveInstance],
    ) -> &'a LiveInstance {
        if instances.len() == 1 {
            return instances[0];
        }

        let mut state = self.weighted_state.entry(service_id.to_string()).or_default();
        let weights: Vec<i32> = instances.iter().map(|i| i.instance.weight() as i32).collect();
        let max_weight = weights.iter().copied().max().unwrap_or(1);
        let gcd = weights.iter().fold(0, |acc, &w| gcd(acc, w)).max(1);

        loop {
            state.current_index = (state.current_index + 1) % instances.len();

            if state.current_index == 0 {
                state.current_weight -= gcd;
                if state.current_weight <= 0 {
                    state.current_weight = max_weight;
                }
            }

            if weights[state.current_index] >= state.current_weight {
                return instances[state.current_index];
            }
        }
    }

    /// Least-connections selection; ties go to the first in id order
    fn select_least_connections<'a>(
        &self,
        service_id: &str,
        instances: &[&'a LiveInstance],
    ) -> &'a LiveInstance {
        instances
            .iter()
            .copied()
            .min_by_key(|i| self.active_connections(service_id, i.id()))
            .unwrap_or(instances[0])
    }
}

impl SnapshotListener for LoadBalancer {
    // In-flight counters survive until their last guard is dropped
    fn snapshot_installed(&self, snapshot: &RouteSnapshot) {
        self.round_robin_index
            .retain(|service_id, _| snapshot.contains_service(service_id));
        self.weighted_state
            .retain(|service_id, _| snapshot.contains_service(service_id));
        self.active_connections.retain(|key, counter| {
            counter.load(Ordering::Acquire) > 0
                || key
                    .split_once('/')
                    .is_some_and(|(service_id, instance_id)| snapshot.contains_instance(service_id, instance_id))
        });
    }
}

/// Random selection
fn select_random<'a>(instances: &[&'a LiveInstance]) -> &'a LiveInstance {
    let index = rand::thread_rng().gen_range(0..instances.len());
    instances[index]
}

fn connection_key(service_id: &str, instance_id: &str) -> String {
    format!("{}/{}", service_id, instance_id)
}

/// Calculate greatest common divisor
fn gcd(a: i32, b: i32) -> i32 {
    if b == 0 {
        a.abs()
    } else {
        gcd(b, a % b)
    }
}
