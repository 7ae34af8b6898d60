//! Device-side state guarded by the per-device exclusion lock
//!
//! `DeviceContext` bundles the storage accounting with the caches of posted
//! offers and bids. It is only ever touched through the gateway's context
//! lock, from the tick thread or from the aggregator path.

use energy_market::{
    Bid, Market, Offer, PostedBids, PostedOffers, StorageConfig, StorageState, FLOATING_POINT_TOLERANCE,
};
use serde_json::{json, Value};

use crate::error::{GatewayError, GatewayResult};
use crate::request::OrderArgs;

#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub state: StorageState,
    pub offers: PostedOffers,
    pub bids: PostedBids,
}

impl DeviceContext {
    pub fn new(storage: StorageConfig) -> Self {
        Self { state: StorageState::new(storage), offers: PostedOffers::new(), bids: PostedBids::new() }
    }

    /// Per-tick accounting refresh for the trading market
    pub fn refresh(&mut self, market: &Market) {
        let slot = market.time_slot();
        self.state.tick(slot);
        self.state.clamp_energy_to_sell_kwh(&[slot]);
        self.state.clamp_energy_to_buy_kwh(&[slot]);
    }

    /// Roll accounting and caches forward to a new trading market
    pub fn market_cycle(&mut self, past: Option<&Market>, market: &Market) {
        self.offers.retain_market(market.id());
        self.bids.retain_market(market.id());
        self.state.market_cycle(past.map(Market::time_slot), market.time_slot());
        self.sync_sell(market);
        self.sync_buy(market);
    }

    pub fn device_info(&self, market: &Market) -> Value {
        self.state.device_info(market.time_slot())
    }

    pub fn post_offer(&mut self, market: &Market, seller: &str, args: OrderArgs) -> GatewayResult<Offer> {
        let available = self.state.energy_to_sell(market.time_slot());
        if args.energy > available + FLOATING_POINT_TOLERANCE {
            return Err(GatewayError::Application(format!(
                "Offer energy {} kWh exceeds the energy available to sell ({} kWh)",
                args.energy, available
            )));
        }
        let offer = market.offer(args.price, args.energy, seller, Some(seller))?;
        self.offers.post(offer.clone(), market.id());
        self.sync_sell(market);
        Ok(offer)
    }

    pub fn post_bid(&mut self, market: &Market, buyer: &str, args: OrderArgs) -> GatewayResult<Bid> {
        let available = self.state.energy_to_buy(market.time_slot());
        if args.energy > available + FLOATING_POINT_TOLERANCE {
            return Err(GatewayError::Application(format!(
                "Bid energy {} kWh exceeds the energy available to buy ({} kWh)",
                args.energy, available
            )));
        }
        let bid = market.bid(args.price, args.energy, buyer, Some(buyer))?;
        self.bids.post(bid.clone(), market.id());
        self.sync_buy(market);
        Ok(bid)
    }

    pub fn is_offer_posted(&self, market: &Market, offer_id: &str) -> bool {
        self.offers.is_posted(market.id(), offer_id)
    }

    pub fn is_bid_posted(&self, market: &Market, bid_id: &str) -> bool {
        self.bids.is_posted(market.id(), bid_id)
    }

    /// Withdraw one open offer, or all of them when `offer_id` is `None`
    pub fn delete_offers(&mut self, market: &Market, offer_id: Option<&str>) -> GatewayResult<Vec<String>> {
        if let Some(id) = offer_id {
            if !self.is_offer_posted(market, id) {
                return Err(GatewayError::Application(
                    "Offer_id is not associated with any posted offer.".to_string(),
                ));
            }
        }
        let deleted = self.offers.remove_from_cache_and_market(market, offer_id)?;
        self.sync_sell(market);
        Ok(deleted)
    }

    /// Withdraw one open bid, or all of them when `bid_id` is `None`
    pub fn delete_bids(&mut self, market: &Market, bid_id: Option<&str>) -> GatewayResult<Vec<String>> {
        if let Some(id) = bid_id {
            if !self.is_bid_posted(market, id) {
                return Err(GatewayError::Application(
                    "Bid_id is not associated with any posted bid.".to_string(),
                ));
            }
        }
        let deleted = self.bids.remove_from_cache_and_market(market, bid_id)?;
        self.sync_buy(market);
        Ok(deleted)
    }

    /// Replace every open offer with one offer of the same total energy at
    /// the rate `args.price / args.energy`
    pub fn update_offers(&mut self, market: &Market, seller: &str, args: OrderArgs) -> GatewayResult<Offer> {
        let open = self.offers.posted_in(market.id());
        if open.is_empty() {
            return Err(GatewayError::Application(
                "Update offer is only possible if the old offer exist".to_string(),
            ));
        }
        let energy: f64 = open.iter().map(|o| o.energy).sum();
        self.offers.remove_from_cache_and_market(market, None)?;

        let offer = market.offer(args.rate() * energy, energy, seller, Some(seller))?;
        self.offers.post(offer.clone(), market.id());
        self.sync_sell(market);
        Ok(offer)
    }

    /// Replace every open bid with one bid of the same total energy at the
    /// rate `args.price / args.energy`
    pub fn update_bids(&mut self, market: &Market, buyer: &str, args: OrderArgs) -> GatewayResult<Bid> {
        let open = self.bids.posted_in(market.id());
        if open.is_empty() {
            return Err(GatewayError::Application(
                "Updated bid would only work if the old exist in market.".to_string(),
            ));
        }
        let energy: f64 = open.iter().map(|b| b.energy).sum();
        self.bids.remove_from_cache_and_market(market, None)?;

        let bid = market.bid(args.rate() * energy, energy, buyer, Some(buyer))?;
        self.bids.post(bid.clone(), market.id());
        self.sync_buy(market);
        Ok(bid)
    }

    fn sync_sell(&mut self, market: &Market) {
        let slot = market.time_slot();
        self.state.set_offered_sell(slot, self.offers.open_energy(market.id()));
        self.state.clamp_energy_to_sell_kwh(&[slot]);
    }

    fn sync_buy(&mut self, market: &Market) {
        let slot = market.time_slot();
        self.state.set_offered_buy(slot, self.bids.open_energy(market.id()));
        self.state.clamp_energy_to_buy_kwh(&[slot]);
    }
}

/// Offers of `seller` in the market as `{id, price, energy}` records
pub fn list_offers(market: &Market, seller: &str) -> Vec<Value> {
    market
        .get_offers()
        .into_iter()
        .filter(|o| o.seller == seller)
        .map(|o| json!({"id": o.id, "price": o.price, "energy": o.energy}))
        .collect()
}

/// Bids of `buyer` in the market as `{id, price, energy}` records
pub fn list_bids(market: &Market, buyer: &str) -> Vec<Value> {
    market
        .get_bids()
        .into_iter()
        .filter(|b| b.buyer == buyer)
        .map(|b| json!({"id": b.id, "price": b.price, "energy": b.energy}))
        .collect()
}

/// Built-in behavior used while a device is under neither external nor
/// aggregator control
pub trait FallbackStrategy: Send + Sync {
    fn event_tick(&self, context: &mut DeviceContext, market: &Market);

    fn event_market_cycle(&self, context: &mut DeviceContext, market: &Market);

    fn area_reconfigure_event(&self, _context: &mut DeviceContext, _settings: &Value) {}
}
