//! In-process registry source

use async_trait::async_trait;
use std::sync::Arc;

use crate::discovery::RegistrySource;
use crate::error::{AppError, Result};
use crate::registry::{Applications, InstanceView, RegistryService};

/// Reads a registry running in the same process
pub struct LocalRegistrySource {
    service: Arc<RegistryService>,
}

impl LocalRegistrySource {
    pub fn new(service: Arc<RegistryService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl RegistrySource for LocalRegistrySource {
    async fn fetch_app(&self, app_name: &str) -> Result<Option<Vec<InstanceView>>> {
        match self.service.fetch(app_name) {
            Ok(instances) => Ok(Some(instances)),
            Err(AppError::ApplicationNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_all(&self) -> Result<Applications> {
        Ok(self.service.fetch_all())
    }
}
