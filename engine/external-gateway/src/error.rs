//! Error types for the ExternalGateway

use energy_market::MarketError;
use message_bus::BusError;
use thiserror::Error;

/// Errors that can occur while admitting or applying external commands
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Client should be registered in order to access this area.")]
    NotConnected,

    #[error("{0}")]
    InvalidArguments(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("{0}")]
    Application(String),

    #[error("Market error: {0}")]
    Market(#[from] MarketError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for ExternalGateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
