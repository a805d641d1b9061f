//! Service instance types shared by the registry and the gateway

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle status reported by an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    #[default]
    Up,
    Down,
    Starting,
    OutOfService,
    Unknown,
}

impl InstanceStatus {
    /// Parse the wire representation, case-insensitively
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "UP" => Some(Self::Up),
            "DOWN" => Some(Self::Down),
            "STARTING" => Some(Self::Starting),
            "OUT_OF_SERVICE" => Some(Self::OutOfService),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Starting => "STARTING",
            Self::OutOfService => "OUT_OF_SERVICE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalise an application name; names are compared case-insensitively
pub fn normalize_app_name(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

/// Identity and address of one running service process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub app_name: String,
    pub instance_id: String,
    pub host: String,
    pub port: u16,
    pub status: InstanceStatus,
    pub lease_duration_secs: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    /// Load-balancing weight from the `weight` metadata entry
    pub fn weight(&self) -> u32 {
        self.metadata
            .get("weight")
            .and_then(|w| w.parse::<u32>().ok())
            .filter(|w| *w > 0)
            .unwrap_or(1)
    }

    /// `host:port` of the instance; IPv6 literals are bracketed
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Registry-side lease of an instance
#[derive(Debug, Clone)]
pub struct Lease {
    pub instance: ServiceInstance,
    /// Time of the last heartbeat (registration or renewal)
    pub last_renewal: Instant,
    /// Time of the latest registration
    pub registered_at: Instant,
    /// Wall clock time of the first registration, for display
    pub registration_time: DateTime<Utc>,
}

impl Lease {
    pub fn new(instance: ServiceInstance, now: Instant) -> Self {
        Self {
            instance,
            last_renewal: now,
            registered_at: now,
            registration_time: Utc::now(),
        }
    }

    pub fn renew(&mut self, now: Instant) {
        self.last_renewal = now;
    }

    /// A lease has expired once a full lease duration passed without a heartbeat
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_renewal) >= self.instance.lease_duration()
    }

    /// Whether the instance may receive traffic
    pub fn is_eligible(&self, now: Instant) -> bool {
        self.instance.status == InstanceStatus::Up && !self.is_expired(now)
    }

    /// Point-in-time view of the lease for callers outside the store
    pub fn view(&self, now: Instant) -> InstanceView {
        InstanceView {
            instance: self.instance.clone(),
            last_renewal_age_ms: now.saturating_duration_since(self.last_renewal).as_millis() as u64,
            registration_time: self.registration_time,
        }
    }
}

/// Instance as returned by fetch operations
///
/// The age of the last heartbeat is exchanged instead of a timestamp, so
/// readers can compute their own deadline without sharing a clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceView {
    #[serde(flatten)]
    pub instance: ServiceInstance,
    pub last_renewal_age_ms: u64,
    pub registration_time: DateTime<Utc>,
}

impl InstanceView {
    /// Remaining lease time as of the moment the view was taken
    pub fn remaining_lease(&self) -> Duration {
        self.instance
            .lease_duration()
            .saturating_sub(Duration::from_millis(self.last_renewal_age_ms))
    }

    pub fn is_eligible(&self) -> bool {
        self.instance.status == InstanceStatus::Up && !self.remaining_lease().is_zero()
    }
}

/// All instances of one application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    pub instances: Vec<InstanceView>,
}

/// Full registry snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Applications {
    pub applications: Vec<Application>,
    pub self_preservation: bool,
}
