//! Grid Dispatch Service Library
//!
//! Configuration loading, logging setup, component wiring and graceful
//! shutdown for a simulated market area whose devices are driven by external
//! clients and aggregators over the message bus.

use anyhow::{Context, Result};
use std::path::Path;

pub mod config;
pub mod logging;
pub mod service;
pub mod signals;

pub use config::{DeviceSpec, LoggingConfig, ServiceConfig, ServiceSettings};
pub use logging::{initialize_logging, initialize_logging_with_config};
pub use service::{DeviceStatus, DispatchService, ServiceStatus};
pub use signals::{graceful_shutdown, shutdown_signal};

/// Load configuration from an optional file and `GRID_*` environment variables
pub fn load_configuration(path: Option<&Path>) -> Result<ServiceConfig> {
    config::load_config(path).context("Failed to load service configuration")
}
