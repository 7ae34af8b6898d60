//! EnergyMarket - one-slot energy markets and device energy accounting
//!
//! This crate holds the market-side collaborators of the external dispatch
//! layer: offers, bids and trades posted into a single-slot market, the
//! market area that rotates markets once per slot, and the storage
//! accounting state that bounds how much energy a device may offer or bid.

pub mod area;
pub mod error;
pub mod market;
pub mod posted;
pub mod state;
pub mod stats;
pub mod types;

pub use area::{AreaConfig, Device, MarketArea};
pub use error::{MarketError, MarketResult};
pub use market::{Market, MarketInfo};
pub use posted::{PostedBids, PostedOffers, PostedOrder, PostedOrders};
pub use state::{StorageConfig, StorageState};
pub use stats::{AreaStats, PriceStats};
pub use types::{Bid, MarketId, Offer, TimeSlot, Trade};

/// Floating point tolerance used when comparing energy amounts
pub const FLOATING_POINT_TOLERANCE: f64 = 1e-5;

/// Default slot length in minutes
pub const DEFAULT_SLOT_LENGTH_MINUTES: i64 = 15;
