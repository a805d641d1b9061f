//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Service registry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_registry_port")]
    pub port: u16,
    /// Lease applied when a registration does not carry one
    #[serde(default = "default_lease_duration")]
    pub default_lease_duration_secs: u64,
    /// Longest lease a registration may ask for
    #[serde(default = "default_max_lease_duration")]
    pub max_lease_duration_secs: u64,
    /// Interval of the heartbeat monitor
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,
    /// Largest share of the registry a single monitor cycle may evict
    #[serde(default = "default_max_eviction_ratio")]
    pub max_eviction_ratio: f64,
    #[serde(default)]
    pub self_preservation: SelfPreservationConfig,
}

/// Self-preservation policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelfPreservationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fraction of expected renewals below which eviction is suspended
    #[serde(default = "default_renewal_threshold")]
    pub renewal_threshold: f64,
    /// Heartbeats an instance is expected to send per lease duration
    #[serde(default = "default_renewals_per_lease")]
    pub expected_renewals_per_lease: u32,
}

/// Gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Remote registry base URL; the in-process registry is used when unset
    #[serde(default)]
    pub registry_url: Option<String>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    /// Expose every registered application under `/{app}/**`
    #[serde(default = "default_true")]
    pub auto_routes: bool,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_staleness_threshold")]
    pub staleness_threshold_secs: u64,
    #[serde(default = "default_forward_timeout")]
    pub forward_timeout_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_load_balancing")]
    pub load_balancing: String,
    #[serde(default = "default_sensitive_headers")]
    pub sensitive_headers: Vec<String>,
    /// Upstream response headers never returned to clients
    #[serde(default = "default_hidden_response_headers")]
    pub hidden_response_headers: Vec<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub self_registration: Option<SelfRegistrationConfig>,
}

/// A configured route
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub path: String,
    pub service_id: String,
    #[serde(default = "default_true")]
    pub strip_prefix: bool,
}

/// Retry policy for forwarded requests
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Retry non-idempotent methods too
    #[serde(default)]
    pub retry_all_methods: bool,
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_keys: Vec<String>,
}

/// Registration of the gateway itself with the registry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelfRegistrationConfig {
    #[serde(default = "default_gateway_app_name")]
    pub app_name: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_renewal_interval")]
    pub renewal_interval_secs: u64,
    #[serde(default = "default_lease_duration")]
    pub lease_duration_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_registry_port() -> u16 {
    8761
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_lease_duration() -> u64 {
    90
}

fn default_max_lease_duration() -> u64 {
    86_400
}

fn default_eviction_interval() -> u64 {
    60
}

fn default_max_eviction_ratio() -> f64 {
    0.15
}

fn default_renewal_threshold() -> f64 {
    0.85
}

fn default_renewals_per_lease() -> u32 {
    3
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_staleness_threshold() -> u64 {
    90
}

fn default_forward_timeout() -> u64 {
    5000
}

fn default_connect_timeout() -> u64 {
    1000
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_load_balancing() -> String {
    "round_robin".to_string()
}

fn default_hidden_response_headers() -> Vec<String> {
    vec!["server".to_string(), "x-powered-by".to_string()]
}

fn default_sensitive_headers() -> Vec<String> {
    vec![
        "cookie".to_string(),
        "set-cookie".to_string(),
        "authorization".to_string(),
    ]
}

fn default_max_retries() -> u32 {
    1
}

fn default_gateway_app_name() -> String {
    "GATEWAY".to_string()
}

fn default_renewal_interval() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_registry_port(),
            default_lease_duration_secs: default_lease_duration(),
            max_lease_duration_secs: default_max_lease_duration(),
            eviction_interval_secs: default_eviction_interval(),
            max_eviction_ratio: default_max_eviction_ratio(),
            self_preservation: SelfPreservationConfig::default(),
        }
    }
}

impl Default for SelfPreservationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            renewal_threshold: default_renewal_threshold(),
            expected_renewals_per_lease: default_renewals_per_lease(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_gateway_port(),
            registry_url: None,
            routes: vec![],
            auto_routes: true,
            refresh_interval_secs: default_refresh_interval(),
            staleness_threshold_secs: default_staleness_threshold(),
            forward_timeout_ms: default_forward_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            max_body_bytes: default_max_body_bytes(),
            load_balancing: default_load_balancing(),
            sensitive_headers: default_sensitive_headers(),
            hidden_response_headers: default_hidden_response_headers(),
            retry: RetryConfig::default(),
            auth: AuthConfig::default(),
            self_registration: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_all_methods: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path
            .as_ref()
            .to_str()
            .ok_or_else(|| AppError::Validation("configuration path is not valid UTF-8".to_string()))?;

        let config = Config::builder()
            .set_default("registry.port", default_registry_port() as i64)?
            .set_default("gateway.port", default_gateway_port() as i64)?
            // Load from configuration file
            .add_source(File::with_name(path).required(false))
            // Override with environment variables (prefixed with DISCOVERY_GATEWAY_)
            .add_source(
                Environment::with_prefix("DISCOVERY_GATEWAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let registry = &self.registry;
        if registry.enabled && registry.port == 0 {
            return Err(invalid("Registry port cannot be 0"));
        }
        if registry.default_lease_duration_secs == 0 {
            return Err(invalid("Default lease duration must be positive"));
        }
        if registry.max_lease_duration_secs < registry.default_lease_duration_secs {
            return Err(invalid("max_lease_duration_secs cannot be below the default lease duration"));
        }
        if registry.eviction_interval_secs == 0 {
            return Err(invalid("Eviction interval must be positive"));
        }
        if !(0.0..=1.0).contains(&registry.max_eviction_ratio) {
            return Err(invalid("max_eviction_ratio must be within [0, 1]"));
        }
        let preservation = &registry.self_preservation;
        if !(0.0..=1.0).contains(&preservation.renewal_threshold) {
            return Err(invalid("renewal_threshold must be within [0, 1]"));
        }
        if preservation.expected_renewals_per_lease == 0 {
            return Err(invalid("expected_renewals_per_lease must be positive"));
        }

        let gateway = &self.gateway;
        if gateway.enabled && gateway.port == 0 {
            return Err(invalid("Gateway port cannot be 0"));
        }
        if gateway.enabled && !registry.enabled && gateway.registry_url.is_none() {
            return Err(invalid(
                "Gateway needs either the in-process registry or a registry_url",
            ));
        }
        if gateway.refresh_interval_secs == 0 {
            return Err(invalid("Route refresh interval must be positive"));
        }
        if gateway.forward_timeout_ms == 0 {
            return Err(invalid("Forward timeout must be positive"));
        }
        if crate::gateway::load_balancer::LoadBalancingStrategy::parse(&gateway.load_balancing)
            .is_none()
        {
            return Err(invalid(&format!(
                "Unknown load balancing strategy '{}'",
                gateway.load_balancing
            )));
        }
        for route in &gateway.routes {
            if !route.path.starts_with('/') {
                return Err(invalid(&format!(
                    "Route path '{}' must start with '/'",
                    route.path
                )));
            }
            if route.service_id.trim().is_empty() {
                return Err(invalid(&format!(
                    "Route '{}' must name a service_id",
                    route.path
                )));
            }
        }
        if let Some(registration) = &gateway.self_registration {
            if registration.host.is_empty() || registration.port == 0 {
                return Err(invalid("self_registration needs a host and a port"));
            }
            if registration.renewal_interval_secs == 0 {
                return Err(invalid("self_registration renewal interval must be positive"));
            }
        }

        Ok(())
    }
}

fn invalid(message: &str) -> AppError {
    AppError::Config(config::ConfigError::Message(message.to_string()))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            gateway: GatewayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
