//! # SimulationClock
//!
//! The heartbeat of a dispatch simulation. One logical thread advances ticks;
//! every `ticks_per_slot` ticks it rotates the area's markets, moves each
//! device gateway to the new slot, rebuilds the market event subscriptions and
//! flushes aggregator market events. Every tick then reaches every gateway, in
//! registration order, which is where queued external commands are applied.

pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;


#[cfg(test)]
mod integration_tests;

pub use clock::{SimulationClock, TickReport};
pub use config::ClockConfig;
pub use error::{ClockError, ClockResult};
pub use metrics::{ClockMetrics, MetricsCollector};

/// Tick counter type
pub type TickId = u64;

/// Current version of the SimulationClock
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default wall-clock time between ticks
pub const DEFAULT_TICK_CADENCE_MS: u64 = 10;

/// Default metrics emission interval
pub const DEFAULT_METRICS_INTERVAL_MS: u64 = 1000;

/// Tick durations kept for the latency statistics
pub const DEFAULT_METRICS_HISTORY: usize = 1000;
