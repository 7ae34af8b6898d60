//! Market area: owns the rotating slot markets and the devices trading in them

use std::sync::Arc;

use chrono::Duration;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::market::Market;
use crate::stats::{AreaStats, PriceStats};
use crate::types::TimeSlot;
use crate::DEFAULT_SLOT_LENGTH_MINUTES;

/// Configuration of a market area
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaConfig {
    /// Length of one slot in minutes
    pub slot_length_minutes: i64,
}

impl Default for AreaConfig {
    fn default() -> Self {
        Self { slot_length_minutes: DEFAULT_SLOT_LENGTH_MINUTES }
    }
}

/// A device participating in an area
#[derive(Debug)]
pub struct Device {
    pub name: String,
    pub uuid: String,
    pub stats: AreaStats,
}

impl Device {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_uuid(name, Uuid::new_v4().to_string())
    }

    pub fn with_uuid(name: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self { name: name.into(), uuid: uuid.into(), stats: AreaStats::new() }
    }
}

#[derive(Debug)]
struct Markets {
    current: Option<Arc<Market>>,
    next: Arc<Market>,
    past: Vec<Arc<Market>>,
}

/// An area whose devices trade in a market that rotates once per slot
///
/// `next_market` is the market open for trading; `current_market` is the one
/// whose slot is being delivered.
#[derive(Debug)]
pub struct MarketArea {
    name: String,
    config: AreaConfig,
    markets: RwLock<Markets>,
    pub stats: AreaStats,
}

impl MarketArea {
    pub fn new(name: impl Into<String>, start: TimeSlot, config: AreaConfig) -> Self {
        let slot_length = Duration::minutes(config.slot_length_minutes);
        Self {
            name: name.into(),
            markets: RwLock::new(Markets {
                current: None,
                next: Arc::new(Market::new(start, slot_length)),
                past: Vec::new(),
            }),
            config,
            stats: AreaStats::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot_length(&self) -> Duration {
        Duration::minutes(self.config.slot_length_minutes)
    }

    pub fn next_market(&self) -> Arc<Market> {
        self.markets.read().next.clone()
    }

    pub fn current_market(&self) -> Option<Arc<Market>> {
        self.markets.read().current.clone()
    }

    /// Markets currently open for trading
    pub fn all_markets(&self) -> Vec<Arc<Market>> {
        vec![self.next_market()]
    }

    pub fn get_market(&self, market_id: &str) -> Option<Arc<Market>> {
        let markets = self.markets.read();
        if markets.next.id() == market_id {
            return Some(markets.next.clone());
        }
        markets
            .current
            .iter()
            .chain(markets.past.iter())
            .find(|m| m.id() == market_id)
            .cloned()
    }

    /// Close the trading market, make it the delivery market and open the
    /// market for the following slot.
    pub fn cycle_markets(&self) -> Arc<Market> {
        let mut markets = self.markets.write();
        let closing = markets.next.clone();
        closing.close();

        let next_slot = closing.time_slot() + self.slot_length();
        let next = Arc::new(Market::new(next_slot, self.slot_length()));
        if let Some(previous) = markets.current.replace(closing.clone()) {
            markets.past.push(previous);
        }
        markets.next = next.clone();
        drop(markets);

        self.stats.record_price_stats(&PriceStats::from_trades(&closing.trades()));
        info!("Area {} cycled markets, trading slot {}", self.name, next.time_slot());
        next
    }

    /// Price statistics of the market currently in delivery
    pub fn price_stats_current_market(&self) -> PriceStats {
        self.current_market().map(|m| PriceStats::from_trades(&m.trades())).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn area() -> MarketArea {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        MarketArea::new("community", start, AreaConfig::default())
    }

    #[test]
    fn test_cycle_markets_advances_slot() {
        let area = area();
        let first = area.next_market();
        assert!(area.current_market().is_none());

        let second = area.cycle_markets();
        assert_eq!(second.time_slot() - first.time_slot(), Duration::minutes(15));
        assert_eq!(area.current_market().unwrap().id(), first.id());
        assert!(first.is_closed());
        assert_eq!(area.all_markets().len(), 1);
        assert_eq!(area.get_market(first.id()).unwrap().id(), first.id());
    }

    #[test]
    fn test_price_stats_recorded_on_cycle() {
        let area = area();
        let market = area.next_market();
        let offer = market.offer(6.0, 2.0, "pv", None).unwrap();
        market.accept_offer(&offer.id, "storage", 2.0).unwrap();

        area.cycle_markets();
        let stats = area.price_stats_current_market();
        assert_eq!(stats.max_trade_rate, Some(3.0));
        assert_eq!(area.stats.non_null_stats().get("max_trade_rate"), Some(&serde_json::json!(3.0)));
    }
}
