//! Error types for the message bus

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session {0} has been reset")]
    SessionClosed(u64),

    #[error("Invalid payload on {channel}: {reason}")]
    InvalidPayload { channel: String, reason: String },

    #[error("Failed to spawn delivery thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;
