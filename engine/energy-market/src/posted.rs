//! Device-side caches of the offers and bids a device has posted

use crate::error::{MarketError, MarketResult};
use crate::market::Market;
use crate::types::{Bid, MarketId, Offer};

/// An order kind a device can post into a market and withdraw again
pub trait PostedOrder: Clone {
    fn id(&self) -> &str;
    fn energy(&self) -> f64;
    fn withdraw(market: &Market, id: &str) -> MarketResult<()>;
}

impl PostedOrder for Offer {
    fn id(&self) -> &str {
        &self.id
    }

    fn energy(&self) -> f64 {
        self.energy
    }

    fn withdraw(market: &Market, id: &str) -> MarketResult<()> {
        market.delete_offer(id).map(|_| ())
    }
}

impl PostedOrder for Bid {
    fn id(&self) -> &str {
        &self.id
    }

    fn energy(&self) -> f64 {
        self.energy
    }

    fn withdraw(market: &Market, id: &str) -> MarketResult<()> {
        market.delete_bid(id).map(|_| ())
    }
}

/// Orders a device has open, each tagged with the market it was posted to
#[derive(Debug, Clone)]
pub struct PostedOrders<T> {
    open: Vec<(T, MarketId)>,
}

pub type PostedOffers = PostedOrders<Offer>;
pub type PostedBids = PostedOrders<Bid>;

impl<T> Default for PostedOrders<T> {
    fn default() -> Self {
        Self { open: Vec::new() }
    }
}

impl<T: PostedOrder> PostedOrders<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&mut self, order: T, market_id: &str) {
        self.open.push((order, market_id.to_string()));
    }

    pub fn is_posted(&self, market_id: &str, order_id: &str) -> bool {
        self.open.iter().any(|(o, m)| m == market_id && o.id() == order_id)
    }

    /// Open orders in one market
    pub fn posted_in(&self, market_id: &str) -> Vec<T> {
        self.open.iter().filter(|(_, m)| m == market_id).map(|(o, _)| o.clone()).collect()
    }

    /// Total energy of the open orders in one market
    pub fn open_energy(&self, market_id: &str) -> f64 {
        self.open.iter().filter(|(_, m)| m == market_id).map(|(o, _)| o.energy()).sum()
    }

    pub fn open(&self) -> &[(T, MarketId)] {
        &self.open
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Drop an order from the cache without touching the market
    pub fn forget(&mut self, order_id: &str) -> Option<T> {
        let index = self.open.iter().position(|(o, _)| o.id() == order_id)?;
        Some(self.open.remove(index).0)
    }

    /// Drop every cached order that does not belong to the given market
    pub fn retain_market(&mut self, market_id: &str) {
        self.open.retain(|(_, m)| m == market_id);
    }

    /// Withdraw one order (or all of them when `order_id` is `None`) from both
    /// the market and the cache. Returns the ids that were withdrawn.
    ///
    /// Orders already gone from the market are still dropped from the cache.
    pub fn remove_from_cache_and_market(
        &mut self,
        market: &Market,
        order_id: Option<&str>,
    ) -> MarketResult<Vec<String>> {
        let targets: Vec<String> = self
            .open
            .iter()
            .filter(|(o, m)| m == market.id() && order_id.is_none_or(|id| o.id() == id))
            .map(|(o, _)| o.id().to_string())
            .collect();

        let mut removed = Vec::with_capacity(targets.len());
        for id in targets {
            match T::withdraw(market, &id) {
                Ok(()) | Err(MarketError::OfferNotFound(_)) | Err(MarketError::BidNotFound(_)) => {}
                Err(e) => return Err(e),
            }
            self.forget(&id);
            removed.push(id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_post_and_remove_single_offer() {
        let market = Market::new(Utc::now(), Duration::minutes(15));
        let mut offers = PostedOffers::new();
        let a = market.offer(1.0, 1.0, "s", None).unwrap();
        let b = market.offer(2.0, 2.0, "s", None).unwrap();
        offers.post(a.clone(), market.id());
        offers.post(b.clone(), market.id());
        assert_eq!(offers.open_energy(market.id()), 3.0);

        let removed = offers.remove_from_cache_and_market(&market, Some(&a.id)).unwrap();
        assert_eq!(removed, vec![a.id.clone()]);
        assert!(!market.has_offer(&a.id));
        assert!(offers.is_posted(market.id(), &b.id));
        assert_eq!(offers.open_energy(market.id()), 2.0);
    }

    #[test]
    fn test_remove_all_bids() {
        let market = Market::new(Utc::now(), Duration::minutes(15));
        let mut bids = PostedBids::new();
        for _ in 0..3 {
            bids.post(market.bid(1.0, 1.0, "b", None).unwrap(), market.id());
        }
        let removed = bids.remove_from_cache_and_market(&market, None).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(bids.is_empty());
        assert!(market.get_bids().is_empty());
    }

    #[test]
    fn test_unknown_id_removes_nothing() {
        let market = Market::new(Utc::now(), Duration::minutes(15));
        let mut offers = PostedOffers::new();
        offers.post(market.offer(1.0, 1.0, "s", None).unwrap(), market.id());
        let removed = offers.remove_from_cache_and_market(&market, Some("missing")).unwrap();
        assert!(removed.is_empty());
        assert_eq!(offers.len(), 1);
    }
}
