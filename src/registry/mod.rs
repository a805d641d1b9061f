//! Service registry - instance store, heartbeat monitor and request surface

pub mod api;
pub mod instance;
pub mod monitor;
pub mod store;

pub use api::{RegisterRequest, RegistryInfo, RegistryService};
pub use instance::{Application, Applications, InstanceStatus, InstanceView, ServiceInstance};
pub use monitor::{CycleReport, HeartbeatMonitor, MonitorConfig, SelfPreservationState};
pub use store::RegistryStore;
