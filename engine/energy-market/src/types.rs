//! Order and trade records exchanged with markets and external clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Market identifier
pub type MarketId = String;

/// Start time of the slot a market trades for
pub type TimeSlot = DateTime<Utc>;

/// A sell order posted by a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub time: DateTime<Utc>,
    pub price: f64,
    pub energy: f64,
    pub seller: String,
    #[serde(default)]
    pub seller_origin: Option<String>,
}

/// A buy order posted by a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: String,
    pub time: DateTime<Utc>,
    pub price: f64,
    pub energy: f64,
    pub buyer: String,
    #[serde(default)]
    pub buyer_origin: Option<String>,
}

/// A matched trade between a seller and a buyer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub time: DateTime<Utc>,
    pub offer_id: String,
    #[serde(default)]
    pub bid_id: Option<String>,
    pub seller: String,
    pub buyer: String,
    pub energy: f64,
    pub price: f64,
    #[serde(default)]
    pub already_tracked: bool,
    #[serde(default)]
    pub offer_bid_trade_info: Option<serde_json::Value>,
    #[serde(default)]
    pub seller_origin: Option<String>,
    #[serde(default)]
    pub buyer_origin: Option<String>,
}

impl Offer {
    /// Price per kWh
    pub fn energy_rate(&self) -> f64 {
        self.price / self.energy
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl Bid {
    /// Price per kWh
    pub fn energy_rate(&self) -> f64 {
        self.price / self.energy
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl Trade {
    /// Price per kWh
    pub fn trade_rate(&self) -> f64 {
        if self.energy > 0.0 {
            self.price / self.energy
        } else {
            0.0
        }
    }

    /// Whether the named device is on either side of the trade
    pub fn involves(&self, device_name: &str) -> bool {
        self.seller == device_name || self.buyer == device_name
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
