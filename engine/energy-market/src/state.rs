//! Energy accounting for storage devices

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::TimeSlot;
use crate::FLOATING_POINT_TOLERANCE;

/// Physical parameters of a storage device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Usable capacity in kWh
    pub capacity_kwh: f64,

    /// State of charge at simulation start, in percent
    pub initial_soc_percent: f64,

    /// Charge that must always remain stored, in percent
    pub min_soc_percent: f64,

    /// Maximum energy that can be charged or discharged within one slot
    pub max_energy_per_slot_kwh: f64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            capacity_kwh: 10.0,
            initial_soc_percent: 50.0,
            min_soc_percent: 10.0,
            max_energy_per_slot_kwh: 5.0,
        }
    }
}

/// Per-slot sell/buy targets and open order energy of a storage device
#[derive(Debug, Clone)]
pub struct StorageState {
    config: StorageConfig,
    used_storage: f64,
    energy_to_sell: BTreeMap<TimeSlot, f64>,
    energy_to_buy: BTreeMap<TimeSlot, f64>,
    offered_sell_kwh: BTreeMap<TimeSlot, f64>,
    offered_buy_kwh: BTreeMap<TimeSlot, f64>,
}

fn non_negative(value: f64) -> f64 {
    if value < FLOATING_POINT_TOLERANCE {
        0.0
    } else {
        value
    }
}

impl StorageState {
    pub fn new(config: StorageConfig) -> Self {
        let used_storage = config.capacity_kwh * config.initial_soc_percent / 100.0;
        Self {
            config,
            used_storage,
            energy_to_sell: BTreeMap::new(),
            energy_to_buy: BTreeMap::new(),
            offered_sell_kwh: BTreeMap::new(),
            offered_buy_kwh: BTreeMap::new(),
        }
    }

    pub fn used_storage(&self) -> f64 {
        self.used_storage
    }

    pub fn free_storage(&self, slot: TimeSlot) -> f64 {
        non_negative(self.config.capacity_kwh - self.used_storage - self.offered_buy(slot))
    }

    fn min_allowed_storage(&self) -> f64 {
        self.config.capacity_kwh * self.config.min_soc_percent / 100.0
    }

    pub fn energy_to_sell(&self, slot: TimeSlot) -> f64 {
        self.energy_to_sell.get(&slot).copied().unwrap_or(0.0)
    }

    pub fn energy_to_buy(&self, slot: TimeSlot) -> f64 {
        self.energy_to_buy.get(&slot).copied().unwrap_or(0.0)
    }

    pub fn offered_sell(&self, slot: TimeSlot) -> f64 {
        self.offered_sell_kwh.get(&slot).copied().unwrap_or(0.0)
    }

    pub fn offered_buy(&self, slot: TimeSlot) -> f64 {
        self.offered_buy_kwh.get(&slot).copied().unwrap_or(0.0)
    }

    pub fn set_offered_sell(&mut self, slot: TimeSlot, energy: f64) {
        self.offered_sell_kwh.insert(slot, energy);
    }

    pub fn set_offered_buy(&mut self, slot: TimeSlot, energy: f64) {
        self.offered_buy_kwh.insert(slot, energy);
    }

    /// Roll accounting forward to a new trading slot
    ///
    /// Open order energy of the past slot expires together with its market.
    pub fn market_cycle(&mut self, past_slot: Option<TimeSlot>, slot: TimeSlot) {
        if let Some(past) = past_slot {
            self.offered_sell_kwh.remove(&past);
            self.offered_buy_kwh.remove(&past);
            self.energy_to_sell.remove(&past);
            self.energy_to_buy.remove(&past);
        }
        self.offered_sell_kwh.retain(|s, _| *s >= slot);
        self.offered_buy_kwh.retain(|s, _| *s >= slot);
        self.offered_sell_kwh.entry(slot).or_insert(0.0);
        self.offered_buy_kwh.entry(slot).or_insert(0.0);
    }

    /// Per-tick update; makes sure the slot is tracked
    pub fn tick(&mut self, slot: TimeSlot) {
        self.offered_sell_kwh.entry(slot).or_insert(0.0);
        self.offered_buy_kwh.entry(slot).or_insert(0.0);
    }

    /// Recompute the energy that can still be offered in each slot
    pub fn clamp_energy_to_sell_kwh(&mut self, slots: &[TimeSlot]) {
        let total_offered: f64 = self.offered_sell_kwh.values().sum();
        let storable = non_negative(self.used_storage - total_offered - self.min_allowed_storage());
        for slot in slots {
            let slot_limit = non_negative(self.config.max_energy_per_slot_kwh - self.offered_sell(*slot));
            self.energy_to_sell.insert(*slot, storable.min(slot_limit));
        }
    }

    /// Recompute the energy that can still be bid for in each slot
    pub fn clamp_energy_to_buy_kwh(&mut self, slots: &[TimeSlot]) {
        let total_offered: f64 = self.offered_buy_kwh.values().sum();
        let free = non_negative(self.config.capacity_kwh - self.used_storage - total_offered);
        for slot in slots {
            let slot_limit = non_negative(self.config.max_energy_per_slot_kwh - self.offered_buy(*slot));
            self.energy_to_buy.insert(*slot, free.min(slot_limit));
        }
    }

    /// Device information reported to external clients for one slot
    pub fn device_info(&self, slot: TimeSlot) -> Value {
        json!({
            "energy_to_sell": self.energy_to_sell(slot),
            "offered_sell_kWh": self.offered_sell(slot),
            "energy_to_buy": self.energy_to_buy(slot),
            "offered_buy_kWh": self.offered_buy(slot),
            "free_storage": self.free_storage(slot),
            "used_storage": self.used_storage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn state() -> StorageState {
        // 5 kWh stored, 1 kWh reserved, 5 kWh per slot
        StorageState::new(StorageConfig::default())
    }

    #[test]
    fn test_clamp_energy_to_sell_respects_reserve_and_offers() {
        let slot = Utc::now();
        let mut state = state();
        state.market_cycle(None, slot);
        state.clamp_energy_to_sell_kwh(&[slot]);
        assert!((state.energy_to_sell(slot) - 4.0).abs() < 1e-9);

        state.set_offered_sell(slot, 3.0);
        state.clamp_energy_to_sell_kwh(&[slot]);
        assert!((state.energy_to_sell(slot) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_clamp_energy_to_buy_respects_free_capacity() {
        let slot = Utc::now();
        let mut state = state();
        state.market_cycle(None, slot);
        state.clamp_energy_to_buy_kwh(&[slot]);
        assert!((state.energy_to_buy(slot) - 5.0).abs() < 1e-9);

        state.set_offered_buy(slot, 4.5);
        state.clamp_energy_to_buy_kwh(&[slot]);
        assert!((state.energy_to_buy(slot) - 0.5).abs() < 1e-9);
        assert!((state.free_storage(slot) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_market_cycle_expires_past_slot() {
        let slot = Utc::now();
        let next = slot + Duration::minutes(15);
        let mut state = state();
        state.market_cycle(None, slot);
        state.set_offered_sell(slot, 2.0);

        state.market_cycle(Some(slot), next);
        assert_eq!(state.offered_sell(slot), 0.0);
        assert_eq!(state.offered_sell(next), 0.0);
        state.clamp_energy_to_sell_kwh(&[next]);
        assert!((state.energy_to_sell(next) - 4.0).abs() < 1e-9);
    }
}
