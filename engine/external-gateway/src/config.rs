//! Configuration for gateways and the market event subscriber

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};
use crate::{
    DEFAULT_DISPATCH_TICK_FREQUENCY_PERCENT, DEFAULT_DRAIN_TIMEOUT_MS, DEFAULT_TICKS_PER_SLOT,
    DEFAULT_WORKER_CAPACITY,
};

/// How device channel prefixes are derived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PrefixMode {
    /// `<device name>`
    Local,
    /// `external/<collaboration id>/<device uuid>`
    Collaboration { collaboration_id: String },
}

/// Per-device gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Ticks in one slot
    pub ticks_per_slot: u64,

    /// Share of the slot, in percent, between two tick notifications
    pub dispatch_tick_frequency_percent: u64,

    /// Channel prefix derivation
    pub prefix: PrefixMode,
}

/// Market event subscriber configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// Concurrent event-processing tasks
    pub worker_capacity: usize,

    /// How long each in-flight task is awaited during market rotation
    pub drain_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ticks_per_slot: DEFAULT_TICKS_PER_SLOT,
            dispatch_tick_frequency_percent: DEFAULT_DISPATCH_TICK_FREQUENCY_PERCENT,
            prefix: PrefixMode::Local,
        }
    }
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self { worker_capacity: DEFAULT_WORKER_CAPACITY, drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS }
    }
}

impl GatewayConfig {
    /// Ticks between two tick notifications, never less than one
    pub fn dispatch_tick_frequency(&self) -> u64 {
        (self.ticks_per_slot * self.dispatch_tick_frequency_percent / 100).max(1)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.ticks_per_slot == 0 {
            return Err(GatewayError::Config("ticks_per_slot must be positive".to_string()));
        }
        if !(1..=100).contains(&self.dispatch_tick_frequency_percent) {
            return Err(GatewayError::Config(format!(
                "dispatch_tick_frequency_percent must be within 1..=100, got {}",
                self.dispatch_tick_frequency_percent
            )));
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: GatewayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl SubscriberConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.worker_capacity == 0 {
            return Err(GatewayError::Config("worker_capacity must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_tick_frequency() {
        let config = GatewayConfig { ticks_per_slot: 60, ..Default::default() };
        assert_eq!(config.dispatch_tick_frequency(), 6);

        let config = GatewayConfig { ticks_per_slot: 5, ..Default::default() };
        assert_eq!(config.dispatch_tick_frequency(), 1);
    }

    #[test]
    fn test_validation() {
        assert!(GatewayConfig::default().validate().is_ok());
        assert!(GatewayConfig { ticks_per_slot: 0, ..Default::default() }.validate().is_err());
        assert!(GatewayConfig { dispatch_tick_frequency_percent: 0, ..Default::default() }
            .validate()
            .is_err());
        assert!(SubscriberConfig { worker_capacity: 0, ..Default::default() }.validate().is_err());
    }

    #[test]
    fn test_prefix_mode_toml() {
        let config = GatewayConfig {
            prefix: PrefixMode::Collaboration { collaboration_id: "c-1".to_string() },
            ..Default::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: GatewayConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.prefix, config.prefix);
    }
}
