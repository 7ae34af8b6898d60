//! Error types for SimulationClock

use thiserror::Error;

/// Errors that can occur in the SimulationClock
#[derive(Error, Debug)]
pub enum ClockError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Device {uuid} is already registered")]
    DeviceAlreadyRegistered { uuid: String },

    #[error("Device {uuid} is not registered")]
    DeviceNotRegistered { uuid: String },

    #[error("Clock is already running")]
    ClockAlreadyRunning,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ClockResult<T> = Result<T, ClockError>;
