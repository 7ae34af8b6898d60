//! Service configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use energy_market::StorageConfig;
use external_gateway::{GatewayConfig, SubscriberConfig};
use message_bus::BusConfig;
use simulation_clock::ClockConfig;

/// Environment variable prefix, e.g. `GRID_CLOCK__TICKS_PER_SLOT=30`
pub const ENV_PREFIX: &str = "GRID";

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// SimulationClock configuration
    pub clock: ClockConfig,

    /// Gateway settings shared by every device; `ticks_per_slot` follows the clock
    pub gateway: GatewayConfig,

    /// Market event subscriber configuration
    pub subscriber: SubscriberConfig,

    /// Message bus configuration
    pub bus: BusConfig,

    /// Service-level configuration
    pub service: ServiceSettings,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Devices trading in the area
    pub devices: Vec<DeviceSpec>,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Name of the simulated market area
    pub area_name: String,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

/// One device in the area
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub name: String,

    /// Generated when unset
    #[serde(default)]
    pub uuid: Option<String>,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Aggregator that controls this device, if any
    #[serde(default)]
    pub aggregator: Option<String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self { area_name: "grid".to_string(), shutdown_timeout_secs: 10 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

impl DeviceSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), uuid: None, storage: StorageConfig::default(), aggregator: None }
    }
}

impl ServiceConfig {
    /// Gateway configuration with the clock's slot length applied
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig { ticks_per_slot: self.clock.ticks_per_slot, ..self.gateway.clone() }
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }
}

/// Load configuration from an optional TOML file, then override it with
/// environment variables
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        tracing::debug!("Loading configuration from file: {:?}", path);
        builder = builder.add_source(config::File::from(path));
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config: ServiceConfig = builder
        .build()
        .context("Failed to read configuration sources")?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration
pub fn validate_config(config: &ServiceConfig) -> Result<()> {
    config.clock.validate().map_err(|e| anyhow::anyhow!(e))?;
    config.gateway_config().validate().map_err(|e| anyhow::anyhow!(e))?;
    config.subscriber.validate().map_err(|e| anyhow::anyhow!(e))?;

    if config.bus.delivery_threads == 0 {
        return Err(anyhow::anyhow!("Bus needs at least one delivery thread"));
    }

    match config.logging.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow::anyhow!("Invalid log level: {}", config.logging.level)),
    }

    match config.logging.format.as_str() {
        "json" | "pretty" | "compact" => {}
        _ => return Err(anyhow::anyhow!("Invalid log format: {}", config.logging.format)),
    }

    let mut names = HashSet::new();
    for device in &config.devices {
        if device.name.is_empty() {
            return Err(anyhow::anyhow!("Device name must not be empty"));
        }
        if !names.insert(device.name.as_str()) {
            return Err(anyhow::anyhow!("Duplicate device name: {}", device.name));
        }
    }

    Ok(())
}
