//! Single-slot market holding open offers, bids and the trades matched in it

use chrono::{Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{MarketError, MarketResult};
use crate::types::{Bid, MarketId, Offer, TimeSlot, Trade};
use crate::FLOATING_POINT_TOLERANCE;

/// Summary of a market as published to external clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketInfo {
    pub id: MarketId,
    pub start_time: String,
    pub duration_min: i64,
    pub time_slot: String,
}

/// A market trading energy for exactly one slot
///
/// Offers, bids and trades sit behind a single lock so the market can be
/// shared between device gateways, the event subscriber and the clock.
#[derive(Debug)]
pub struct Market {
    id: MarketId,
    time_slot: TimeSlot,
    duration: Duration,
    book: RwLock<OrderBook>,
}

#[derive(Debug, Default)]
struct OrderBook {
    offers: Vec<Offer>,
    bids: Vec<Bid>,
    trades: Vec<Trade>,
    closed: bool,
}

fn validate(price: f64, energy: f64) -> MarketResult<()> {
    if !energy.is_finite() || energy <= 0.0 {
        return Err(MarketError::InvalidEnergy(energy));
    }
    if !price.is_finite() || price < 0.0 {
        return Err(MarketError::InvalidPrice(price));
    }
    Ok(())
}

impl Market {
    pub fn new(time_slot: TimeSlot, duration: Duration) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            time_slot,
            duration,
            book: RwLock::new(OrderBook::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn time_slot(&self) -> TimeSlot {
        self.time_slot
    }

    pub fn info(&self) -> MarketInfo {
        MarketInfo {
            id: self.id.clone(),
            start_time: self.time_slot.to_rfc3339(),
            duration_min: self.duration.num_minutes(),
            time_slot: self.time_slot.format("%Y-%m-%dT%H:%M").to_string(),
        }
    }

    /// Post a new offer
    pub fn offer(
        &self,
        price: f64,
        energy: f64,
        seller: &str,
        seller_origin: Option<&str>,
    ) -> MarketResult<Offer> {
        validate(price, energy)?;
        let mut book = self.book.write();
        if book.closed {
            return Err(MarketError::MarketClosed(self.id.clone()));
        }
        let offer = Offer {
            id: Uuid::new_v4().to_string(),
            time: Utc::now(),
            price,
            energy,
            seller: seller.to_string(),
            seller_origin: seller_origin.map(str::to_string),
        };
        book.offers.push(offer.clone());
        debug!("Market {} accepted offer {} ({} kWh @ {})", self.id, offer.id, energy, price);
        Ok(offer)
    }

    /// Remove an open offer
    pub fn delete_offer(&self, offer_id: &str) -> MarketResult<Offer> {
        let mut book = self.book.write();
        let index = book
            .offers
            .iter()
            .position(|o| o.id == offer_id)
            .ok_or_else(|| MarketError::OfferNotFound(offer_id.to_string()))?;
        Ok(book.offers.remove(index))
    }

    pub fn has_offer(&self, offer_id: &str) -> bool {
        self.book.read().offers.iter().any(|o| o.id == offer_id)
    }

    pub fn get_offers(&self) -> Vec<Offer> {
        self.book.read().offers.clone()
    }

    /// Post a new bid
    pub fn bid(
        &self,
        price: f64,
        energy: f64,
        buyer: &str,
        buyer_origin: Option<&str>,
    ) -> MarketResult<Bid> {
        validate(price, energy)?;
        let mut book = self.book.write();
        if book.closed {
            return Err(MarketError::MarketClosed(self.id.clone()));
        }
        let bid = Bid {
            id: Uuid::new_v4().to_string(),
            time: Utc::now(),
            price,
            energy,
            buyer: buyer.to_string(),
            buyer_origin: buyer_origin.map(str::to_string),
        };
        book.bids.push(bid.clone());
        debug!("Market {} accepted bid {} ({} kWh @ {})", self.id, bid.id, energy, price);
        Ok(bid)
    }

    /// Remove an open bid
    pub fn delete_bid(&self, bid_id: &str) -> MarketResult<Bid> {
        let mut book = self.book.write();
        let index = book
            .bids
            .iter()
            .position(|b| b.id == bid_id)
            .ok_or_else(|| MarketError::BidNotFound(bid_id.to_string()))?;
        Ok(book.bids.remove(index))
    }

    pub fn has_bid(&self, bid_id: &str) -> bool {
        self.book.read().bids.iter().any(|b| b.id == bid_id)
    }

    pub fn get_bids(&self) -> Vec<Bid> {
        self.book.read().bids.clone()
    }

    /// Buy (part of) an open offer; the unsold residual stays in the book
    /// under a fresh id.
    pub fn accept_offer(&self, offer_id: &str, buyer: &str, energy: f64) -> MarketResult<Trade> {
        let mut book = self.book.write();
        if book.closed {
            return Err(MarketError::MarketClosed(self.id.clone()));
        }
        let index = book
            .offers
            .iter()
            .position(|o| o.id == offer_id)
            .ok_or_else(|| MarketError::OfferNotFound(offer_id.to_string()))?;
        let offer = book.offers.remove(index);
        if energy <= 0.0 || energy > offer.energy + FLOATING_POINT_TOLERANCE {
            let available = offer.energy;
            book.offers.insert(index, offer);
            return Err(MarketError::InsufficientEnergy { requested: energy, available });
        }

        let rate = offer.energy_rate();
        let residual = offer.energy - energy;
        if residual > FLOATING_POINT_TOLERANCE {
            book.offers.insert(
                index,
                Offer {
                    id: Uuid::new_v4().to_string(),
                    price: rate * residual,
                    energy: residual,
                    ..offer.clone()
                },
            );
        }

        let trade = Trade {
            id: Uuid::new_v4().to_string(),
            time: Utc::now(),
            offer_id: offer.id.clone(),
            bid_id: None,
            seller: offer.seller.clone(),
            buyer: buyer.to_string(),
            energy,
            price: rate * energy,
            already_tracked: false,
            offer_bid_trade_info: None,
            seller_origin: offer.seller_origin.clone(),
            buyer_origin: Some(buyer.to_string()),
        };
        book.trades.push(trade.clone());
        Ok(trade)
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.book.read().trades.clone()
    }

    /// Stop accepting new orders
    pub fn close(&self) {
        self.book.write().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.book.read().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market() -> Market {
        Market::new(Utc::now(), Duration::minutes(15))
    }

    #[test]
    fn test_offer_and_delete() {
        let market = market();
        let offer = market.offer(10.0, 2.0, "storage", Some("storage")).unwrap();
        assert!(market.has_offer(&offer.id));
        assert_eq!(market.get_offers().len(), 1);

        market.delete_offer(&offer.id).unwrap();
        assert!(!market.has_offer(&offer.id));
        assert_eq!(
            market.delete_offer(&offer.id),
            Err(MarketError::OfferNotFound(offer.id.clone()))
        );
    }

    #[test]
    fn test_invalid_orders_rejected() {
        let market = market();
        assert_eq!(market.offer(1.0, 0.0, "a", None), Err(MarketError::InvalidEnergy(0.0)));
        assert_eq!(market.bid(-1.0, 1.0, "a", None), Err(MarketError::InvalidPrice(-1.0)));
    }

    #[test]
    fn test_partial_accept_leaves_residual() {
        let market = market();
        let offer = market.offer(10.0, 4.0, "pv", None).unwrap();
        let trade = market.accept_offer(&offer.id, "storage", 1.0).unwrap();

        assert_eq!(trade.energy, 1.0);
        assert_eq!(trade.price, 2.5);
        let remaining = market.get_offers();
        assert_eq!(remaining.len(), 1);
        assert!((remaining[0].energy - 3.0).abs() < 1e-9);
        assert_ne!(remaining[0].id, offer.id);
        assert_eq!(market.trades().len(), 1);
    }

    #[test]
    fn test_closed_market_rejects_orders() {
        let market = market();
        market.close();
        assert!(matches!(market.bid(1.0, 1.0, "a", None), Err(MarketError::MarketClosed(_))));
    }
}
