//! Heartbeat monitor: lease expiry and self-preservation

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::registry::store::{EvictOutcome, RegistryStore};

/// Process-wide self-preservation state, replaced as a whole once per cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelfPreservationState {
    pub enabled: bool,
    /// Eviction is suspended while active
    pub active: bool,
    pub expected_renewals: f64,
    pub actual_renewals: u64,
    pub threshold: f64,
    #[serde(skip)]
    pub evaluated_at: Option<Instant>,
}

impl Default for SelfPreservationState {
    fn default() -> Self {
        Self {
            enabled: true,
            active: false,
            expected_renewals: 0.0,
            actual_renewals: 0,
            threshold: 0.85,
            evaluated_at: None,
        }
    }
}

/// Heartbeat monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub self_preservation_enabled: bool,
    pub renewal_threshold: f64,
    pub expected_renewals_per_lease: u32,
    pub max_eviction_ratio: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_settings(&RegistryConfig::default())
    }
}

impl MonitorConfig {
    pub fn from_settings(config: &RegistryConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.eviction_interval_secs),
            self_preservation_enabled: config.self_preservation.enabled,
            renewal_threshold: config.self_preservation.renewal_threshold,
            expected_renewals_per_lease: config.self_preservation.expected_renewals_per_lease,
            max_eviction_ratio: config.max_eviction_ratio,
        }
    }
}

/// Outcome of one monitor cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub expected_renewals: f64,
    pub actual_renewals: u64,
    pub self_preservation: bool,
    /// Leases found expired, including those left for a later cycle
    pub expired: usize,
    pub evicted: Vec<(String, String)>,
}

/// Periodically expires stale leases
pub struct HeartbeatMonitor {
    store: Arc<RegistryStore>,
    config: MonitorConfig,
    window_start: Mutex<Instant>,
    task: RwLock<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    pub fn new(store: Arc<RegistryStore>, config: MonitorConfig) -> Self {
        store.set_preservation(SelfPreservationState {
            enabled: config.self_preservation_enabled,
            threshold: config.renewal_threshold,
            ..SelfPreservationState::default()
        });

        Self {
            store,
            config,
            window_start: Mutex::new(Instant::now()),
            task: RwLock::new(None),
        }
    }

    /// Start the background task; the first cycle runs one interval from now
    pub async fn start(self: &Arc<Self>) {
        let monitor = self.clone();
        let period = self.config.interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                monitor.run_cycle();
            }
        });

        if let Some(previous) = self.task.write().await.replace(handle) {
            previous.abort();
        }
        info!(interval_secs = period.as_secs(), "Started heartbeat monitor");
    }

    /// Stop the background task
    pub async fn stop(&self) {
        if let Some(handle) = self.task.write().await.take() {
            handle.abort();
            info!("Stopped heartbeat monitor");
        }
    }

    /// Evaluate self-preservation and evict expired leases once
    pub fn run_cycle(&self) -> CycleReport {
        let now = Instant::now();
        let window_start = std::mem::replace(&mut *self.window_start.lock(), now);
        let window = now.saturating_duration_since(window_start);

        let actual = self.store.take_renewals();
        let expected = self.store.expected_renewals(
            window_start,
            window,
            self.config.expected_renewals_per_lease,
        );
        let below_threshold = expected > 0.0 && (actual as f64) < expected * self.config.renewal_threshold;
        let active = self.config.self_preservation_enabled && below_threshold;

        let was_active = self.store.preservation().active;
        self.store.set_preservation(SelfPreservationState {
            enabled: self.config.self_preservation_enabled,
            active,
            expected_renewals: expected,
            actual_renewals: actual,
            threshold: self.config.renewal_threshold,
            evaluated_at: Some(now),
        });

        match (was_active, active) {
            (false, true) => warn!(
                expected_renewals = expected,
                actual_renewals = actual,
                threshold = self.config.renewal_threshold,
                "Renewal rate below threshold, partition suspected: entering self-preservation"
            ),
            (true, false) => info!(
                expected_renewals = expected,
                actual_renewals = actual,
                "Renewal rate recovered: leaving self-preservation"
            ),
            _ => debug!(
                expected_renewals = expected,
                actual_renewals = actual,
                self_preservation = active,
                "Evaluated renewal rate"
            ),
        }

        let mut report = CycleReport {
            expected_renewals: expected,
            actual_renewals: actual,
            self_preservation: active,
            ..CycleReport::default()
        };

        let mut candidates = self.store.expired_candidates(now);
        report.expired = candidates.len();
        if candidates.is_empty() {
            return report;
        }
        if active {
            warn!(
                expired = candidates.len(),
                "Self-preservation active, skipping eviction of expired leases"
            );
            return report;
        }

        let limit = eviction_limit(self.store.instance_count(), self.config.max_eviction_ratio);
        if candidates.len() > limit {
            warn!(
                expired = candidates.len(),
                limit,
                "Eviction capped for this cycle"
            );
            candidates.shuffle(&mut rand::thread_rng());
            candidates.truncate(limit);
        }

        for (app, instance_id) in candidates {
            match self.store.evict(&app, &instance_id) {
                EvictOutcome::Evicted(instance) => {
                    info!(
                        app = %app,
                        instance = %instance_id,
                        lease_secs = instance.lease_duration_secs,
                        "Lease expired, evicted instance"
                    );
                    report.evicted.push((app, instance_id));
                }
                outcome => debug!(app = %app, instance = %instance_id, ?outcome, "Eviction skipped"),
            }
        }

        report
    }
}

/// Largest number of instances one cycle may evict from a registry of `size`
pub fn eviction_limit(size: usize, max_ratio: f64) -> usize {
    let retained = (size as f64 * (1.0 - max_ratio.clamp(0.0, 1.0))).floor() as usize;
    size.saturating_sub(retained)
}
