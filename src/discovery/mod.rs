//! Discovery module - how the gateway reads registry state

pub mod client;
pub mod heartbeat;
pub mod local;

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::{Applications, InstanceView};

pub use client::RegistryClient;
pub use heartbeat::InstanceHeartbeat;
pub use local::LocalRegistrySource;

/// Read access to a registry
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Instances of an application, `None` when the registry does not know it
    async fn fetch_app(&self, app_name: &str) -> Result<Option<Vec<InstanceView>>>;

    /// Every registered application
    async fn fetch_all(&self) -> Result<Applications>;
}
