//! Typed commands decoded from external payloads
//!
//! Every command accepts exactly one argument set. Missing and unexpected
//! keys are both admission errors, so a request that reaches the pending
//! queue is always well formed.

use std::fmt;

use serde_json::{Map, Value};

use crate::error::{GatewayError, GatewayResult};

const TRANSACTION_ID: &str = "transaction_id";
const TYPE: &str = "type";

/// Interactive commands, one channel each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Offer,
    DeleteOffer,
    ListOffers,
    Bid,
    DeleteBid,
    ListBids,
    DeviceInfo,
}

impl CommandKind {
    pub const ALL: [CommandKind; 7] = [
        CommandKind::Offer,
        CommandKind::DeleteOffer,
        CommandKind::ListOffers,
        CommandKind::Bid,
        CommandKind::DeleteBid,
        CommandKind::ListBids,
        CommandKind::DeviceInfo,
    ];

    /// Last segment of the command channel
    pub fn topic(self) -> &'static str {
        match self {
            CommandKind::Offer => "offer",
            CommandKind::DeleteOffer => "delete_offer",
            CommandKind::ListOffers => "list_offers",
            CommandKind::Bid => "bid",
            CommandKind::DeleteBid => "delete_bid",
            CommandKind::ListBids => "list_bids",
            CommandKind::DeviceInfo => "device_info",
        }
    }

    /// Last segment of the response channel
    pub fn response_topic(self) -> &'static str {
        match self {
            CommandKind::DeviceInfo => "stats",
            other => other.topic(),
        }
    }

    /// `command` discriminator carried by responses
    pub fn command_name(self) -> &'static str {
        match self {
            CommandKind::DeleteOffer => "offer_delete",
            CommandKind::DeleteBid => "bid_delete",
            other => other.topic(),
        }
    }

    fn required_keys(self) -> &'static [&'static str] {
        match self {
            CommandKind::Offer | CommandKind::Bid => &["price", "energy", TRANSACTION_ID],
            _ => &[TRANSACTION_ID],
        }
    }

    fn optional_keys(self) -> &'static [&'static str] {
        match self {
            CommandKind::DeleteOffer => &["offer"],
            CommandKind::DeleteBid => &["bid"],
            _ => &[],
        }
    }

    fn usage(self) -> &'static str {
        match self {
            CommandKind::Offer | CommandKind::Bid => "(price, energy)",
            CommandKind::DeleteOffer => "(offer)",
            CommandKind::DeleteBid => "(bid)",
            _ => "()",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

/// Caller supplied correlation token, echoed verbatim on every response
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransactionId(Value);

impl TransactionId {
    /// Extract the token from a decoded payload; `null` when absent
    pub fn from_payload(payload: &Value) -> Self {
        Self(payload.get(TRANSACTION_ID).cloned().unwrap_or(Value::Null))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn is_missing(&self) -> bool {
        self.0.is_null()
    }
}

impl From<Value> for TransactionId {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self(Value::String(value.to_string()))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

/// Total price and energy of a new order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderArgs {
    pub price: f64,
    pub energy: f64,
}

impl OrderArgs {
    fn from_args(args: &Map<String, Value>) -> Result<Self, String> {
        let price = number(args, "price")?;
        let energy = number(args, "energy")?;
        if energy <= 0.0 {
            return Err(format!("energy must be positive, got {}", energy));
        }
        if price < 0.0 {
            return Err(format!("price must not be negative, got {}", price));
        }
        Ok(Self { price, energy })
    }

    /// Price per kWh
    pub fn rate(&self) -> f64 {
        self.price / self.energy
    }
}

/// A validated interactive command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Offer(OrderArgs),
    DeleteOffer { offer_id: Option<String> },
    ListOffers,
    Bid(OrderArgs),
    DeleteBid { bid_id: Option<String> },
    ListBids,
    DeviceInfo,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Offer(_) => CommandKind::Offer,
            Command::DeleteOffer { .. } => CommandKind::DeleteOffer,
            Command::ListOffers => CommandKind::ListOffers,
            Command::Bid(_) => CommandKind::Bid,
            Command::DeleteBid { .. } => CommandKind::DeleteBid,
            Command::ListBids => CommandKind::ListBids,
            Command::DeviceInfo => CommandKind::DeviceInfo,
        }
    }

    /// Validate the argument set of a command received on `kind`'s channel
    pub fn parse(kind: CommandKind, payload: &Value) -> GatewayResult<Self> {
        let args = payload.as_object().ok_or_else(|| {
            GatewayError::MalformedPayload(format!("{} payload must be a JSON object", kind))
        })?;

        let invalid = |detail: String| {
            GatewayError::InvalidArguments(format!(
                "Incorrect {} request. Available parameters: {}. {}",
                kind,
                kind.usage(),
                detail
            ))
        };

        check_keys(args, kind.required_keys(), kind.optional_keys()).map_err(invalid)?;

        let command = match kind {
            CommandKind::Offer => Command::Offer(OrderArgs::from_args(args).map_err(invalid)?),
            CommandKind::Bid => Command::Bid(OrderArgs::from_args(args).map_err(invalid)?),
            CommandKind::DeleteOffer => {
                Command::DeleteOffer { offer_id: optional_id(args, "offer").map_err(invalid)? }
            }
            CommandKind::DeleteBid => {
                Command::DeleteBid { bid_id: optional_id(args, "bid").map_err(invalid)? }
            }
            CommandKind::ListOffers => Command::ListOffers,
            CommandKind::ListBids => Command::ListBids,
            CommandKind::DeviceInfo => Command::DeviceInfo,
        };
        Ok(command)
    }
}

/// An admitted command waiting for the next tick
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    pub command: Command,
    pub transaction_id: TransactionId,
    pub response_channel: String,
}

impl IncomingRequest {
    pub fn new(command: Command, transaction_id: TransactionId, response_channel: String) -> Self {
        Self { command, transaction_id, response_channel }
    }
}

/// A validated aggregator command
#[derive(Debug, Clone, PartialEq)]
pub enum AggregatorCommand {
    Offer(OrderArgs),
    UpdateOffer(OrderArgs),
    DeleteOffer { offer_id: Option<String> },
    ListOffers,
    Bid(OrderArgs),
    UpdateBid(OrderArgs),
    DeleteBid { bid_id: Option<String> },
    ListBids,
}

impl AggregatorCommand {
    /// `command` discriminator carried by the result record
    pub fn command_name(&self) -> &'static str {
        match self {
            AggregatorCommand::Offer(_) => "offer",
            AggregatorCommand::UpdateOffer(_) => "update_offer",
            AggregatorCommand::DeleteOffer { .. } => "offer_delete",
            AggregatorCommand::ListOffers => "list_offers",
            AggregatorCommand::Bid(_) => "bid",
            AggregatorCommand::UpdateBid(_) => "update_bid",
            AggregatorCommand::DeleteBid { .. } => "bid_delete",
            AggregatorCommand::ListBids => "list_bids",
        }
    }

    /// Decode one entry of an aggregator batch, dispatched on its `type` field
    pub fn parse(payload: &Value) -> GatewayResult<Self> {
        let args = payload.as_object().ok_or_else(|| {
            GatewayError::MalformedPayload("aggregator command must be a JSON object".to_string())
        })?;
        let command_type = args.get(TYPE).and_then(Value::as_str).ok_or_else(|| {
            GatewayError::InvalidArguments("aggregator command has no type".to_string())
        })?;

        let invalid = |detail: String| {
            GatewayError::InvalidArguments(format!(
                "Incorrect {} aggregator request. {}",
                command_type, detail
            ))
        };
        let order_keys: &[&str] = &["price", "energy", TRANSACTION_ID, TYPE];
        let plain_keys: &[&str] = &[TRANSACTION_ID, TYPE];

        let command = match command_type {
            "offer" | "update_offer" | "bid" | "update_bid" => {
                check_keys(args, order_keys, &[]).map_err(invalid)?;
                let order = OrderArgs::from_args(args).map_err(invalid)?;
                match command_type {
                    "offer" => AggregatorCommand::Offer(order),
                    "update_offer" => AggregatorCommand::UpdateOffer(order),
                    "bid" => AggregatorCommand::Bid(order),
                    _ => AggregatorCommand::UpdateBid(order),
                }
            }
            "delete_offer" => {
                check_keys(args, plain_keys, &["offer"]).map_err(invalid)?;
                AggregatorCommand::DeleteOffer {
                    offer_id: optional_id(args, "offer").map_err(invalid)?,
                }
            }
            "delete_bid" => {
                check_keys(args, plain_keys, &["bid"]).map_err(invalid)?;
                AggregatorCommand::DeleteBid { bid_id: optional_id(args, "bid").map_err(invalid)? }
            }
            "list_offers" => {
                check_keys(args, plain_keys, &[]).map_err(invalid)?;
                AggregatorCommand::ListOffers
            }
            "list_bids" => {
                check_keys(args, plain_keys, &[]).map_err(invalid)?;
                AggregatorCommand::ListBids
            }
            other => {
                return Err(GatewayError::InvalidArguments(format!(
                    "Unknown aggregator command type: {}",
                    other
                )))
            }
        };
        Ok(command)
    }
}

fn check_keys(args: &Map<String, Value>, required: &[&str], optional: &[&str]) -> Result<(), String> {
    let missing: Vec<&str> =
        required.iter().copied().filter(|key| !args.contains_key(*key)).collect();
    let mut unexpected: Vec<&str> = args
        .keys()
        .map(String::as_str)
        .filter(|key| !required.contains(key) && !optional.contains(key))
        .collect();
    unexpected.sort_unstable();

    match (missing.is_empty(), unexpected.is_empty()) {
        (true, true) => Ok(()),
        (false, true) => Err(format!("Missing keys: {}", missing.join(", "))),
        (true, false) => Err(format!("Unexpected keys: {}", unexpected.join(", "))),
        (false, false) => Err(format!(
            "Missing keys: {}. Unexpected keys: {}",
            missing.join(", "),
            unexpected.join(", ")
        )),
    }
}

fn number(args: &Map<String, Value>, key: &str) -> Result<f64, String> {
    args.get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("{} must be a finite number", key))
}

fn optional_id(args: &Map<String, Value>, key: &str) -> Result<Option<String>, String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Ok(Some(id.clone())),
        Some(other) => Err(format!("{} must be an id string, got {}", key, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_parse_offer() {
        let payload = json!({"price": 10.0, "energy": 2.0, "transaction_id": "t1"});
        let command = Command::parse(CommandKind::Offer, &payload).unwrap();
        assert_eq!(command, Command::Offer(OrderArgs { price: 10.0, energy: 2.0 }));
        assert_eq!(TransactionId::from_payload(&payload), TransactionId::from("t1"));
    }

    #[test]
    fn test_parse_rejects_extra_and_missing_keys() {
        let extra = json!({"price": 1, "energy": 1, "transaction_id": "t", "seller": "x"});
        let err = Command::parse(CommandKind::Bid, &extra).unwrap_err();
        assert!(err.to_string().contains("Unexpected keys: seller"));

        let missing = json!({"price": 1, "transaction_id": "t"});
        let err = Command::parse(CommandKind::Offer, &missing).unwrap_err();
        assert!(err.to_string().contains("Missing keys: energy"));
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        let payload = json!({"price": 1, "energy": 0, "transaction_id": "t"});
        assert!(Command::parse(CommandKind::Offer, &payload).is_err());

        let payload = json!({"price": "cheap", "energy": 1, "transaction_id": "t"});
        assert!(Command::parse(CommandKind::Offer, &payload).is_err());

        assert!(matches!(
            Command::parse(CommandKind::ListOffers, &json!([1, 2])),
            Err(GatewayError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_parse_delete() {
        let payload = json!({"transaction_id": "t"});
        assert_eq!(
            Command::parse(CommandKind::DeleteOffer, &payload).unwrap(),
            Command::DeleteOffer { offer_id: None }
        );

        let payload = json!({"transaction_id": "t", "bid": "b-1"});
        assert_eq!(
            Command::parse(CommandKind::DeleteBid, &payload).unwrap(),
            Command::DeleteBid { bid_id: Some("b-1".to_string()) }
        );

        let payload = json!({"transaction_id": "t", "bid": "b-1"});
        assert!(Command::parse(CommandKind::DeleteOffer, &payload).is_err());
    }

    #[test]
    fn test_command_names() {
        assert_eq!(CommandKind::DeleteOffer.command_name(), "offer_delete");
        assert_eq!(CommandKind::ListBids.command_name(), "list_bids");
        assert_eq!(CommandKind::DeviceInfo.response_topic(), "stats");
    }

    #[test]
    fn test_parse_aggregator_commands() {
        let payload = json!({"type": "update_bid", "price": 3, "energy": 1, "transaction_id": "t"});
        let command = AggregatorCommand::parse(&payload).unwrap();
        assert_eq!(command, AggregatorCommand::UpdateBid(OrderArgs { price: 3.0, energy: 1.0 }));
        assert_eq!(command.command_name(), "update_bid");

        // Interactive argument set is not enough for the aggregator path
        let payload = json!({"price": 3, "energy": 1, "transaction_id": "t"});
        assert!(AggregatorCommand::parse(&payload).is_err());

        let payload = json!({"type": "teleport", "transaction_id": "t"});
        assert!(AggregatorCommand::parse(&payload).is_err());
    }

    const ORDER_KEYS: [&str; 6] = ["price", "energy", "transaction_id", "seller", "offer", "type"];

    proptest! {
        #[test]
        fn prop_order_admission_needs_exact_key_set(mask in 0u8..64) {
            let mut args = Map::new();
            for (i, key) in ORDER_KEYS.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    args.insert(key.to_string(), json!(1.0));
                }
            }
            let exact = mask & 0b111 == 0b111 && mask >> 3 == 0;
            let parsed = Command::parse(CommandKind::Offer, &Value::Object(args));
            prop_assert_eq!(parsed.is_ok(), exact);
        }

        #[test]
        fn prop_transaction_id_echoed_verbatim(token in "[a-z0-9-]{1,24}") {
            let payload = json!({"transaction_id": token.clone(), "unexpected": true});
            prop_assert!(Command::parse(CommandKind::ListOffers, &payload).is_err());
            let txid = TransactionId::from_payload(&payload);
            prop_assert_eq!(txid.as_value(), &json!(token));
        }
    }
}
