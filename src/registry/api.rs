//! Registry operations with input validation
//!
//! `RegistryService` is the transport-agnostic surface of the registry: it
//! validates requests, translates them into store operations and maps store
//! outcomes to `AppError`s. The HTTP handlers in `crate::api::registry` are a
//! thin layer over it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::registry::instance::{
    normalize_app_name, Applications, InstanceStatus, InstanceView, ServiceInstance,
};
use crate::registry::monitor::SelfPreservationState;
use crate::registry::store::RegistryStore;

/// Body of a registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub instance_id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub status: Option<InstanceStatus>,
    #[serde(default)]
    pub lease_duration_secs: Option<u64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Registry counters and self-preservation state
#[derive(Debug, Clone, Serialize)]
pub struct RegistryInfo {
    pub applications: usize,
    pub instances: usize,
    pub self_preservation: SelfPreservationState,
}

/// Longest lease accepted unless configured otherwise
pub const DEFAULT_MAX_LEASE_DURATION_SECS: u64 = 86_400;

/// Validating front of the registry store
pub struct RegistryService {
    store: Arc<RegistryStore>,
    default_lease_duration_secs: u64,
    max_lease_duration_secs: u64,
}

impl RegistryService {
    pub fn new(store: Arc<RegistryStore>, default_lease_duration_secs: u64) -> Self {
        Self {
            store,
            default_lease_duration_secs,
            max_lease_duration_secs: DEFAULT_MAX_LEASE_DURATION_SECS.max(default_lease_duration_secs),
        }
    }

    /// Cap the lease a registration may ask for
    pub fn with_max_lease_duration(mut self, max_lease_duration_secs: u64) -> Self {
        self.max_lease_duration_secs = max_lease_duration_secs;
        self
    }

    pub fn store(&self) -> &Arc<RegistryStore> {
        &self.store
    }

    /// Register or replace an instance of `app_name`
    pub fn register(&self, app_name: &str, request: RegisterRequest) -> Result<ServiceInstance> {
        let app_name = required("app_name", app_name)?;
        let instance_id = required("instance_id", &request.instance_id)?;
        let host = required("host", &request.host)?;
        if request.port == 0 {
            return Err(AppError::Validation("port must be non-zero".to_string()));
        }
        let lease_duration_secs = request
            .lease_duration_secs
            .unwrap_or(self.default_lease_duration_secs);
        if lease_duration_secs == 0 {
            return Err(AppError::Validation(
                "lease_duration_secs must be positive".to_string(),
            ));
        }
        if lease_duration_secs > self.max_lease_duration_secs {
            return Err(AppError::Validation(format!(
                "lease_duration_secs must not exceed {}",
                self.max_lease_duration_secs
            )));
        }

        let instance = ServiceInstance {
            app_name: normalize_app_name(&app_name),
            instance_id,
            host,
            port: request.port,
            status: request.status.unwrap_or_default(),
            lease_duration_secs,
            metadata: request.metadata,
        };
        self.store.register(instance.clone());
        Ok(instance)
    }

    /// Renew a lease; an unknown instance must register again
    pub fn renew(&self, app_name: &str, instance_id: &str) -> Result<()> {
        let app_name = required("app_name", app_name)?;
        let instance_id = required("instance_id", instance_id)?;
        if self.store.renew(&app_name, &instance_id) {
            Ok(())
        } else {
            Err(AppError::InstanceNotFound {
                app_name: normalize_app_name(&app_name),
                instance_id,
            })
        }
    }

    /// Remove an instance; succeeds whether or not it was registered
    pub fn cancel(&self, app_name: &str, instance_id: &str) -> Result<()> {
        let app_name = required("app_name", app_name)?;
        let instance_id = required("instance_id", instance_id)?;
        self.store.cancel(&app_name, &instance_id);
        Ok(())
    }

    /// Override the status of a registered instance
    pub fn update_status(&self, app_name: &str, instance_id: &str, status: &str) -> Result<()> {
        let app_name = required("app_name", app_name)?;
        let instance_id = required("instance_id", instance_id)?;
        let status = InstanceStatus::parse(status)
            .ok_or_else(|| AppError::Validation(format!("unknown status '{}'", status)))?;

        if self.store.update_status(&app_name, &instance_id, status) {
            Ok(())
        } else {
            Err(AppError::InstanceNotFound {
                app_name: normalize_app_name(&app_name),
                instance_id,
            })
        }
    }

    /// Instances of one application
    pub fn fetch(&self, app_name: &str) -> Result<Vec<InstanceView>> {
        let app_name = required("app_name", app_name)?;
        self.store
            .fetch(&app_name)
            .ok_or_else(|| AppError::ApplicationNotFound(normalize_app_name(&app_name)))
    }

    /// Every application
    pub fn fetch_all(&self) -> Applications {
        Applications {
            applications: self.store.fetch_all(),
            self_preservation: self.store.preservation().active,
        }
    }

    pub fn info(&self) -> RegistryInfo {
        let applications = self.store.fetch_all();
        RegistryInfo {
            applications: applications.len(),
            instances: applications.iter().map(|app| app.instances.len()).sum(),
            self_preservation: self.store.preservation().as_ref().clone(),
        }
    }
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}
