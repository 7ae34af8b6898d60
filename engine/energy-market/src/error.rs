//! Error types for the energy market

use thiserror::Error;

/// Errors that can occur when interacting with a market or a device state
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketError {
    #[error("Offer {0} does not exist in the market")]
    OfferNotFound(String),

    #[error("Bid {0} does not exist in the market")]
    BidNotFound(String),

    #[error("Energy must be a positive finite value, got {0}")]
    InvalidEnergy(f64),

    #[error("Price must be a non-negative finite value, got {0}")]
    InvalidPrice(f64),

    #[error("Requested {requested} kWh exceeds the available {available} kWh")]
    InsufficientEnergy { requested: f64, available: f64 },

    #[error("Market {0} is not open for trading")]
    MarketClosed(String),
}

/// Result type for market operations
pub type MarketResult<T> = Result<T, MarketError>;
