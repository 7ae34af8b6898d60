//! Market event records received on the broadcast channels

use std::fmt;

use energy_market::{Bid, Offer, Trade};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::error::{GatewayError, GatewayResult};

/// Events a market broadcasts to the simulation's listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketEvent {
    Offer = 1,
    OfferSplit = 2,
    OfferDeleted = 3,
    Trade = 4,
    BidTraded = 5,
    BidDeleted = 6,
    BidSplit = 7,
}

impl MarketEvent {
    pub const ALL: [MarketEvent; 7] = [
        MarketEvent::Offer,
        MarketEvent::OfferSplit,
        MarketEvent::OfferDeleted,
        MarketEvent::Trade,
        MarketEvent::BidTraded,
        MarketEvent::BidDeleted,
        MarketEvent::BidSplit,
    ];

    /// Numeric identifier used on the wire
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            MarketEvent::Offer => "offer",
            MarketEvent::OfferSplit => "offer_split",
            MarketEvent::OfferDeleted => "offer_deleted",
            MarketEvent::Trade => "trade",
            MarketEvent::BidTraded => "bid_traded",
            MarketEvent::BidDeleted => "bid_deleted",
            MarketEvent::BidSplit => "bid_split",
        }
    }

    pub fn from_id(id: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|e| u64::from(e.id()) == id)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|e| e.name() == name)
    }

    /// Accepts either the numeric id or the event name
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().and_then(Self::from_id),
            Value::String(s) => Self::from_name(s),
            _ => None,
        }
    }
}

impl fmt::Display for MarketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Keyword arguments of a market event with embedded records reconstructed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventArgs {
    /// Market the event was broadcast for
    pub market_id: String,
    pub offer: Option<Offer>,
    pub existing_offer: Option<Offer>,
    pub new_offer: Option<Offer>,
    pub bid: Option<Bid>,
    pub existing_bid: Option<Bid>,
    pub new_bid: Option<Bid>,
    pub trade: Option<Trade>,
    pub bid_trade: Option<Trade>,
    /// Keywords that carry no embedded record
    pub extra: Map<String, Value>,
}

const EMBEDDED_KEYS: [&str; 8] =
    ["offer", "existing_offer", "new_offer", "bid", "existing_bid", "new_bid", "trade", "bid_trade"];

impl EventArgs {
    pub fn from_kwargs(market_id: &str, mut kwargs: Map<String, Value>) -> GatewayResult<Self> {
        let mut args = EventArgs {
            market_id: market_id.to_string(),
            offer: embedded(&kwargs, "offer")?,
            existing_offer: embedded(&kwargs, "existing_offer")?,
            new_offer: embedded(&kwargs, "new_offer")?,
            bid: embedded(&kwargs, "bid")?,
            existing_bid: embedded(&kwargs, "existing_bid")?,
            new_bid: embedded(&kwargs, "new_bid")?,
            trade: embedded(&kwargs, "trade")?,
            bid_trade: embedded(&kwargs, "bid_trade")?,
            extra: Map::new(),
        };
        for key in EMBEDDED_KEYS {
            kwargs.remove(key);
        }
        kwargs.remove("market_id");
        args.extra = kwargs;
        Ok(args)
    }

    /// The trade carried by a trade event, whichever keyword it came under
    pub fn any_trade(&self) -> Option<&Trade> {
        self.trade.as_ref().or(self.bid_trade.as_ref())
    }
}

/// Embedded records arrive either as serialized JSON text or inline
fn embedded<T: DeserializeOwned>(kwargs: &Map<String, Value>, key: &str) -> GatewayResult<Option<T>> {
    match kwargs.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(serde_json::from_str(text)?)),
        Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
    }
}

/// One decoded broadcast message
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyEvent {
    pub event_type: MarketEvent,
    pub args: EventArgs,
    pub transaction_uuid: Value,
}

impl NotifyEvent {
    /// Decode `{"event_type", "kwargs", "transaction_uuid"}` received on the
    /// channel of `market_id`
    pub fn decode(market_id: &str, data: &str) -> GatewayResult<Self> {
        let mut record: Map<String, Value> = serde_json::from_str(data)?;

        let event_type = record
            .get("event_type")
            .and_then(MarketEvent::from_value)
            .ok_or_else(|| GatewayError::MalformedPayload("unknown or missing event_type".to_string()))?;

        let transaction_uuid = match record.remove("transaction_uuid") {
            Some(Value::Null) | None => {
                return Err(GatewayError::MalformedPayload(
                    "market event without transaction_uuid".to_string(),
                ))
            }
            Some(token) => token,
        };

        let kwargs = match record.remove("kwargs") {
            Some(Value::Object(kwargs)) => kwargs,
            None | Some(Value::Null) => Map::new(),
            Some(other) => {
                return Err(GatewayError::MalformedPayload(format!(
                    "kwargs must be an object, got {}",
                    other
                )))
            }
        };

        Ok(Self { event_type, args: EventArgs::from_kwargs(market_id, kwargs)?, transaction_uuid })
    }

    /// Acknowledgement published once the listeners have run
    pub fn ack(&self) -> Value {
        json!({
            "response": self.event_type.name(),
            "event_type_id": self.event_type.id(),
            "transaction_uuid": self.transaction_uuid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn trade() -> Trade {
        Trade {
            id: "tr-1".to_string(),
            time: Utc::now(),
            offer_id: "o-1".to_string(),
            bid_id: None,
            seller: "pv".to_string(),
            buyer: "storage".to_string(),
            energy: 1.0,
            price: 3.0,
            already_tracked: false,
            offer_bid_trade_info: None,
            seller_origin: None,
            buyer_origin: None,
        }
    }

    #[test]
    fn test_event_ids_and_names() {
        assert_eq!(MarketEvent::Trade.id(), 4);
        assert_eq!(MarketEvent::from_id(7), Some(MarketEvent::BidSplit));
        assert_eq!(MarketEvent::from_name("OFFER_DELETED"), Some(MarketEvent::OfferDeleted));
        assert_eq!(MarketEvent::from_id(42), None);
    }

    #[test]
    fn test_decode_reconstructs_embedded_records() {
        let data = json!({
            "event_type": 4,
            "kwargs": {"trade": trade().to_json_string(), "note": "x"},
            "transaction_uuid": "uuid-1",
        })
        .to_string();

        let event = NotifyEvent::decode("m1", &data).unwrap();
        assert_eq!(event.event_type, MarketEvent::Trade);
        assert_eq!(event.args.market_id, "m1");
        assert_eq!(event.args.trade.as_ref().map(|t| t.id.as_str()), Some("tr-1"));
        assert_eq!(event.args.extra.get("note"), Some(&json!("x")));
        assert_eq!(
            event.ack(),
            json!({"response": "trade", "event_type_id": 4, "transaction_uuid": "uuid-1"})
        );
    }

    #[test]
    fn test_decode_inline_object() {
        let trade = serde_json::to_value(trade()).unwrap();
        let data = json!({"event_type": "bid_traded", "kwargs": {"bid_trade": trade}, "transaction_uuid": 9})
            .to_string();
        let event = NotifyEvent::decode("m1", &data).unwrap();
        assert!(event.args.any_trade().is_some());
    }

    #[test]
    fn test_decode_failures() {
        assert!(NotifyEvent::decode("m1", "not json").is_err());
        let no_token = json!({"event_type": 1, "kwargs": {}}).to_string();
        assert!(NotifyEvent::decode("m1", &no_token).is_err());
        let bad_offer = json!({"event_type": 1, "kwargs": {"offer": "{broken"}, "transaction_uuid": "u"})
            .to_string();
        assert!(NotifyEvent::decode("m1", &bad_offer).is_err());
    }
}
