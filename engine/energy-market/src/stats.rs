//! Market price statistics and aggregated per-area statistics

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::Trade;

/// Trade price statistics of a closed market
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceStats {
    pub min_trade_rate: Option<f64>,
    pub avg_trade_rate: Option<f64>,
    pub max_trade_rate: Option<f64>,
    pub median_trade_rate: Option<f64>,
    #[serde(rename = "total_traded_energy_kWh")]
    pub total_traded_energy_kwh: f64,
}

impl PriceStats {
    pub fn from_trades(trades: &[Trade]) -> Self {
        if trades.is_empty() {
            return Self::default();
        }

        let mut rates: Vec<f64> = trades.iter().map(Trade::trade_rate).collect();
        rates.sort_by(|a, b| a.total_cmp(b));

        let total_energy: f64 = trades.iter().map(|t| t.energy).sum();
        let total_price: f64 = trades.iter().map(|t| t.price).sum();
        let mid = rates.len() / 2;
        let median = if rates.len() % 2 == 0 { (rates[mid - 1] + rates[mid]) / 2.0 } else { rates[mid] };

        Self {
            min_trade_rate: rates.first().copied(),
            avg_trade_rate: (total_energy > 0.0).then(|| total_price / total_energy),
            max_trade_rate: rates.last().copied(),
            median_trade_rate: Some(median),
            total_traded_energy_kwh: total_energy,
        }
    }
}

/// Aggregated statistics for an area or a device
///
/// Values may be null while no data has been collected for them yet.
#[derive(Debug, Default)]
pub struct AreaStats {
    aggregated: RwLock<Map<String, Value>>,
}

impl AreaStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: Value) {
        self.aggregated.write().insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.aggregated.read().get(key).cloned()
    }

    /// Snapshot of all aggregated values, including null ones
    pub fn aggregated_stats(&self) -> Map<String, Value> {
        self.aggregated.read().clone()
    }

    /// Snapshot without null-valued entries
    pub fn non_null_stats(&self) -> Map<String, Value> {
        self.aggregated
            .read()
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Accumulated bills of the owner
    pub fn bills(&self) -> Value {
        self.get("bills").unwrap_or(Value::Null)
    }

    /// Replace the price statistics entries with those of a freshly closed market
    pub fn record_price_stats(&self, stats: &PriceStats) {
        let mut aggregated = self.aggregated.write();
        let value = serde_json::to_value(stats).unwrap_or(Value::Null);
        if let Value::Object(fields) = value {
            for (key, value) in fields {
                aggregated.insert(key, value);
            }
        }
    }
}
