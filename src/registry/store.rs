//! Concurrent in-memory store of service instance leases

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::registry::instance::{
    normalize_app_name, Application, InstanceStatus, InstanceView, Lease, ServiceInstance,
};
use crate::registry::monitor::SelfPreservationState;

/// Leases of one application, guarded by their own lock
type Bucket = RwLock<HashMap<String, Lease>>;

/// Result of an eviction attempt
#[derive(Debug, Clone, PartialEq)]
pub enum EvictOutcome {
    Evicted(ServiceInstance),
    /// The instance renewed after it was selected for eviction
    NotExpired,
    Absent,
    /// Self-preservation is active
    Suppressed,
}

/// Registry of service instances keyed by application, then instance id
///
/// Each application bucket has its own lock, so operations on unrelated
/// applications never contend beyond the map shard.
pub struct RegistryStore {
    apps: DashMap<String, Bucket>,
    renewals: AtomicU64,
    preservation: ArcSwap<SelfPreservationState>,
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryStore {
    pub fn new() -> Self {
        Self {
            apps: DashMap::new(),
            renewals: AtomicU64::new(0),
            preservation: ArcSwap::from_pointee(SelfPreservationState::default()),
        }
    }

    /// Insert or replace an instance; the registration counts as a heartbeat.
    ///
    /// Returns true when an instance with the same id was replaced.
    pub fn register(&self, mut instance: ServiceInstance) -> bool {
        let now = Instant::now();
        let key = normalize_app_name(&instance.app_name);
        instance.app_name = key.clone();
        let instance_id = instance.instance_id.clone();

        let bucket = self.apps.entry(key.clone()).or_default();
        let mut leases = bucket.write();
        let replaced = match leases.get_mut(&instance_id) {
            Some(existing) => {
                existing.instance = instance;
                existing.last_renewal = now;
                existing.registered_at = now;
                true
            }
            None => {
                leases.insert(instance_id.clone(), Lease::new(instance, now));
                false
            }
        };
        drop(leases);
        drop(bucket);

        self.renewals.fetch_add(1, Ordering::Relaxed);
        info!(app = %key, instance = %instance_id, replaced, "Registered instance");
        replaced
    }

    /// Refresh the lease of a registered instance.
    ///
    /// Returns false when the instance is unknown, in which case the caller
    /// has to register again.
    pub fn renew(&self, app_name: &str, instance_id: &str) -> bool {
        let key = normalize_app_name(app_name);
        let renewed = match self.apps.get(&key) {
            Some(bucket) => match bucket.write().get_mut(instance_id) {
                Some(lease) => {
                    lease.renew(Instant::now());
                    true
                }
                None => false,
            },
            None => false,
        };

        if renewed {
            self.renewals.fetch_add(1, Ordering::Relaxed);
            debug!(app = %key, instance = %instance_id, "Renewed lease");
        } else {
            debug!(app = %key, instance = %instance_id, "Renewal for unknown instance");
        }
        renewed
    }

    /// Remove an instance. Removing an absent instance is not an error.
    ///
    /// Returns the removed instance, if there was one.
    pub fn cancel(&self, app_name: &str, instance_id: &str) -> Option<ServiceInstance> {
        let key = normalize_app_name(app_name);
        let removed = self.remove(&key, instance_id);
        if removed.is_some() {
            info!(app = %key, instance = %instance_id, "Cancelled instance");
        }
        removed
    }

    /// Override the status of a registered instance
    pub fn update_status(&self, app_name: &str, instance_id: &str, status: InstanceStatus) -> bool {
        let key = normalize_app_name(app_name);
        let updated = self
            .apps
            .get(&key)
            .map(|bucket| match bucket.write().get_mut(instance_id) {
                Some(lease) => {
                    lease.instance.status = status;
                    true
                }
                None => false,
            })
            .unwrap_or(false);

        if updated {
            info!(app = %key, instance = %instance_id, status = %status, "Updated instance status");
        }
        updated
    }

    /// Snapshot of one application, `None` when it has no instances
    pub fn fetch(&self, app_name: &str) -> Option<Vec<InstanceView>> {
        let key = normalize_app_name(app_name);
        let now = Instant::now();
        let bucket = self.apps.get(&key)?;
        let leases = bucket.read();
        if leases.is_empty() {
            return None;
        }
        Some(leases.values().map(|lease| lease.view(now)).collect())
    }

    /// Snapshot of every application; each one is read under its own lock
    pub fn fetch_all(&self) -> Vec<Application> {
        let now = Instant::now();
        let mut applications: Vec<Application> = self
            .apps
            .iter()
            .filter_map(|entry| {
                let leases = entry.value().read();
                if leases.is_empty() {
                    return None;
                }
                Some(Application {
                    name: entry.key().clone(),
                    instances: leases.values().map(|lease| lease.view(now)).collect(),
                })
            })
            .collect();
        applications.sort_by(|a, b| a.name.cmp(&b.name));
        applications
    }

    /// Number of registered instances
    pub fn instance_count(&self) -> usize {
        self.apps.iter().map(|entry| entry.value().read().len()).sum()
    }

    /// `(app, instance id)` of every lease expired at `now`
    pub fn expired_candidates(&self, now: Instant) -> Vec<(String, String)> {
        let mut expired = Vec::new();
        for entry in self.apps.iter() {
            let leases = entry.value().read();
            expired.extend(
                leases
                    .values()
                    .filter(|lease| lease.is_expired(now))
                    .map(|lease| (entry.key().clone(), lease.instance.instance_id.clone())),
            );
        }
        expired
    }

    /// Renewals the registry should have seen during a window.
    ///
    /// Only instances registered before the window started are expected to
    /// have sent heartbeats for all of it.
    pub fn expected_renewals(&self, window_start: Instant, window: Duration, renewals_per_lease: u32) -> f64 {
        let window_secs = window.as_secs_f64();
        self.apps
            .iter()
            .map(|entry| {
                entry
                    .value()
                    .read()
                    .values()
                    .filter(|lease| lease.registered_at < window_start)
                    .map(|lease| {
                        let lease_secs = lease.instance.lease_duration_secs.max(1) as f64;
                        window_secs * renewals_per_lease as f64 / lease_secs
                    })
                    .sum::<f64>()
            })
            .sum()
    }

    /// Heartbeats counted since the previous call
    pub fn take_renewals(&self) -> u64 {
        self.renewals.swap(0, Ordering::AcqRel)
    }

    /// Remove an instance whose lease has expired, unless self-preservation is active
    pub fn evict(&self, app_name: &str, instance_id: &str) -> EvictOutcome {
        if self.preservation.load().active {
            return EvictOutcome::Suppressed;
        }

        let key = normalize_app_name(app_name);
        let now = Instant::now();
        let outcome = match self.apps.get(&key) {
            Some(bucket) => {
                let mut leases = bucket.write();
                let expired = leases.get(instance_id).map(|lease| lease.is_expired(now));
                match expired {
                    Some(true) => leases
                        .remove(instance_id)
                        .map(|lease| EvictOutcome::Evicted(lease.instance))
                        .unwrap_or(EvictOutcome::Absent),
                    Some(false) => EvictOutcome::NotExpired,
                    None => EvictOutcome::Absent,
                }
            }
            None => EvictOutcome::Absent,
        };

        if matches!(outcome, EvictOutcome::Evicted(_)) {
            self.apps.remove_if(&key, |_, bucket| bucket.read().is_empty());
        }
        outcome
    }

    /// Current self-preservation state
    pub fn preservation(&self) -> Arc<SelfPreservationState> {
        self.preservation.load_full()
    }

    /// Replace the self-preservation state as a whole
    pub fn set_preservation(&self, state: SelfPreservationState) {
        self.preservation.store(Arc::new(state));
    }

    fn remove(&self, key: &str, instance_id: &str) -> Option<ServiceInstance> {
        let removed = self
            .apps
            .get(key)
            .and_then(|bucket| bucket.write().remove(instance_id))
            .map(|lease| lease.instance);

        if removed.is_some() {
            self.apps.remove_if(key, |_, bucket| bucket.read().is_empty());
        }
        removed
    }
}
