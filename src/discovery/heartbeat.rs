//! Keeps one instance registered by renewing its lease

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SelfRegistrationConfig;
use crate::discovery::RegistryClient;
use crate::registry::{InstanceStatus, RegisterRequest};

/// Registers an instance and renews it until stopped
pub struct InstanceHeartbeat {
    client: Arc<RegistryClient>,
    app_name: String,
    registration: RegisterRequest,
    interval: Duration,
    task: RwLock<Option<JoinHandle<()>>>,
}

impl InstanceHeartbeat {
    pub fn new(
        client: Arc<RegistryClient>,
        app_name: String,
        registration: RegisterRequest,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            app_name,
            registration,
            interval,
            task: RwLock::new(None),
        }
    }

    /// Heartbeat for the gateway's own registration
    pub fn from_config(client: Arc<RegistryClient>, config: &SelfRegistrationConfig) -> Self {
        let instance_id = config
            .instance_id
            .clone()
            .unwrap_or_else(|| format!("{}:{}:{}", config.host, config.app_name.to_lowercase(), config.port));

        Self::new(
            client,
            config.app_name.clone(),
            RegisterRequest {
                instance_id,
                host: config.host.clone(),
                port: config.port,
                status: Some(InstanceStatus::Up),
                lease_duration_secs: Some(config.lease_duration_secs),
                metadata: Default::default(),
            },
            Duration::from_secs(config.renewal_interval_secs),
        )
    }

    pub fn instance_id(&self) -> &str {
        &self.registration.instance_id
    }

    /// Register and start renewing in the background
    pub async fn start(&self) {
        let client = self.client.clone();
        let app_name = self.app_name.clone();
        let registration = self.registration.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut registered = register(&client, &app_name, &registration).await;
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

            loop {
                interval.tick().await;

                if !registered {
                    registered = register(&client, &app_name, &registration).await;
                    continue;
                }

                match client.renew(&app_name, &registration.instance_id).await {
                    Ok(true) => debug!(app = %app_name, instance = %registration.instance_id, "Lease renewed"),
                    Ok(false) => {
                        warn!(
                            app = %app_name,
                            instance = %registration.instance_id,
                            "Registry lost the instance, registering again"
                        );
                        registered = register(&client, &app_name, &registration).await;
                    }
                    Err(e) => warn!(app = %app_name, error = %e, "Lease renewal failed"),
                }
            }
        });

        if let Some(previous) = self.task.write().await.replace(handle) {
            previous.abort();
        }
        info!(app = %self.app_name, instance = %self.registration.instance_id, "Started instance heartbeat");
    }

    /// Stop renewing and cancel the registration
    pub async fn stop(&self) {
        if let Some(handle) = self.task.write().await.take() {
            handle.abort();
        }
        match self
            .client
            .cancel(&self.app_name, &self.registration.instance_id)
            .await
        {
            Ok(()) => info!(app = %self.app_name, instance = %self.registration.instance_id, "Cancelled registration"),
            Err(e) => warn!(app = %self.app_name, error = %e, "Failed to cancel registration"),
        }
    }
}

async fn register(client: &RegistryClient, app_name: &str, registration: &RegisterRequest) -> bool {
    match client.register(app_name, registration).await {
        Ok(()) => {
            info!(app = %app_name, instance = %registration.instance_id, "Registered instance");
            true
        }
        Err(e) => {
            warn!(app = %app_name, error = %e, "Registration failed, will retry");
            false
        }
    }
}
