//! Request counters for the gateway

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::gateway::route_table::{RouteSnapshot, SnapshotListener};

#[derive(Debug, Default)]
struct InstanceCounters {
    requests: AtomicU64,
    failures: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_max_ms: AtomicU64,
}

/// Counters shared by all requests
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    requests: AtomicU64,
    failed_requests: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    /// Keyed by `SERVICE/instance-id`
    instances: DashMap<String, InstanceCounters>,
}

/// Serializable view of the counters
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub failed_requests: u64,
    pub attempts: u64,
    pub retries: u64,
    pub instances: BTreeMap<String, InstanceMetrics>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InstanceMetrics {
    pub requests: u64,
    pub failures: u64,
    pub avg_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A request finished, successfully or not
    pub fn record_request(&self, failed: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// One forward attempt against an instance
    pub fn record_attempt(&self, service_id: &str, instance_id: &str, latency: Duration, failed: bool) {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let latency_ms = latency.as_millis() as u64;
        let counters = self
            .instances
            .entry(format!("{}/{}", service_id, instance_id))
            .or_default();
        counters.requests.fetch_add(1, Ordering::Relaxed);
        if failed {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        counters.latency_total_ms.fetch_add(latency_ms, Ordering::Relaxed);
        counters.latency_max_ms.fetch_max(latency_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let instances = self
            .instances
            .iter()
            .map(|entry| {
                let c = entry.value();
                let requests = c.requests.load(Ordering::Relaxed);
                let total = c.latency_total_ms.load(Ordering::Relaxed);
                (
                    entry.key().clone(),
                    InstanceMetrics {
                        requests,
                        failures: c.failures.load(Ordering::Relaxed),
                        avg_latency_ms: if requests == 0 { 0 } else { total / requests },
                        max_latency_ms: c.latency_max_ms.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            instances,
        }
    }
}

impl SnapshotListener for GatewayMetrics {
    /// Drop the counters of instances that left the registry
    fn snapshot_installed(&self, snapshot: &RouteSnapshot) {
        self.instances.retain(|key, _| {
            key.split_once('/')
                .is_some_and(|(service_id, instance_id)| snapshot.contains_instance(service_id, instance_id))
        });
    }
}
