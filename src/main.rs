//! Main entry point for the Discovery Gateway

use discovery_gateway::{
    app::Application,
    config::{LoggingConfig, Settings, DEFAULT_CONFIG_PATH},
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable naming the configuration file
const CONFIG_PATH_ENV: &str = "DISCOVERY_GATEWAY_CONFIG";

fn init_logging(config: &LoggingConfig) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().pretty()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let settings = Settings::load_from_path(&config_path)?;

    init_logging(&settings.logging);
    info!("Starting Discovery Gateway");
    info!(
        config = %config_path,
        registry_enabled = settings.registry.enabled,
        registry_port = settings.registry.port,
        gateway_enabled = settings.gateway.enabled,
        gateway_port = settings.gateway.port,
        routes = settings.gateway.routes.len(),
        "Loaded configuration"
    );

    let app = Application::build(settings, config_path)?;
    app.run().await?;

    info!("Discovery Gateway stopped");
    Ok(())
}
