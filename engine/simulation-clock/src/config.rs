//! Configuration for SimulationClock

use std::time::Duration;

use energy_market::DEFAULT_SLOT_LENGTH_MINUTES;
use external_gateway::DEFAULT_TICKS_PER_SLOT;
use serde::{Deserialize, Serialize};

use crate::error::{ClockError, ClockResult};
use crate::{DEFAULT_METRICS_INTERVAL_MS, DEFAULT_TICK_CADENCE_MS};

/// Configuration for the SimulationClock
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Ticks that make up one market slot
    pub ticks_per_slot: u64,

    /// Wall-clock time between ticks in milliseconds (0 runs as fast as possible)
    pub tick_cadence_ms: u64,

    /// Simulated length of one slot in minutes
    pub slot_length_minutes: i64,

    /// Stop after this many slot rotations; run until stopped when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_slots: Option<u64>,

    /// Metrics emission interval in milliseconds
    pub metrics_interval_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            ticks_per_slot: DEFAULT_TICKS_PER_SLOT,
            tick_cadence_ms: DEFAULT_TICK_CADENCE_MS,
            slot_length_minutes: DEFAULT_SLOT_LENGTH_MINUTES,
            max_slots: None,
            metrics_interval_ms: DEFAULT_METRICS_INTERVAL_MS,
        }
    }
}

impl ClockConfig {
    /// Get tick cadence as Duration
    pub fn tick_cadence(&self) -> Duration {
        Duration::from_millis(self.tick_cadence_ms)
    }

    /// Get metrics interval as Duration
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    pub fn validate(&self) -> ClockResult<()> {
        if self.ticks_per_slot == 0 {
            return Err(ClockError::Config("ticks_per_slot must be greater than zero".to_string()));
        }
        if self.slot_length_minutes <= 0 {
            return Err(ClockError::Config("slot_length_minutes must be positive".to_string()));
        }
        Ok(())
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ClockConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
