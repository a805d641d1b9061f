//! HTTP client for a remote registry

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

use crate::discovery::RegistrySource;
use crate::error::{AppError, Result};
use crate::registry::{Applications, InstanceView, RegisterRequest};

/// Client of the registry HTTP API
pub struct RegistryClient {
    base_url: Url,
    client: Client,
}

impl RegistryClient {
    /// Create a client for the registry at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::Validation(format!("invalid registry url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Validation(format!(
                "registry url '{}' cannot be a base",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { base_url, client })
    }

    /// `{base}/eureka/apps/{segments...}` with each segment percent-encoded
    fn apps_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Internal("registry url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["eureka", "apps"])
            .extend(segments);
        Ok(url)
    }

    pub async fn register(&self, app_name: &str, request: &RegisterRequest) -> Result<()> {
        let response = self
            .client
            .post(self.apps_url(&[app_name])?)
            .json(request)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                debug!(app = %app_name, instance = %request.instance_id, "Registered with registry");
                Ok(())
            }
            StatusCode::BAD_REQUEST => {
                let body = response.text().await.unwrap_or_default();
                Err(AppError::Validation(body))
            }
            status => Err(unexpected("register", status)),
        }
    }

    /// Renew a lease; `Ok(false)` means the registry no longer knows the instance
    pub async fn renew(&self, app_name: &str, instance_id: &str) -> Result<bool> {
        let response = self
            .client
            .put(self.apps_url(&[app_name, instance_id])?)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(unexpected("renew", status)),
        }
    }

    pub async fn cancel(&self, app_name: &str, instance_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.apps_url(&[app_name, instance_id])?)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            status => Err(unexpected("cancel", status)),
        }
    }
}

#[async_trait]
impl RegistrySource for RegistryClient {
    async fn fetch_app(&self, app_name: &str) -> Result<Option<Vec<InstanceView>>> {
        let response = self.client.get(self.apps_url(&[app_name])?).send().await?;

        match response.status() {
            status if status.is_success() => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(unexpected("fetch", status)),
        }
    }

    async fn fetch_all(&self) -> Result<Applications> {
        let response = self.client.get(self.apps_url(&[])?).send().await?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            status => Err(unexpected("fetch_all", status)),
        }
    }
}

fn unexpected(operation: &str, status: StatusCode) -> AppError {
    AppError::RegistryUnavailable(format!("{} returned {}", operation, status))
}
