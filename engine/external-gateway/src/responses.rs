//! Response records published back to external clients

use std::fmt;

use serde_json::{Map, Value};

use crate::request::TransactionId;

pub const NOT_CONNECTED_MESSAGE: &str = "Client should be registered in order to access this area.";

/// A `{status, command, transaction_id, ...}` response record
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    body: Map<String, Value>,
}

impl Response {
    fn with_status(status: &str, command: &str, transaction_id: &TransactionId) -> Self {
        let mut body = Map::new();
        body.insert("command".to_string(), Value::from(command));
        body.insert("status".to_string(), Value::from(status));
        body.insert("transaction_id".to_string(), transaction_id.as_value().clone());
        Self { body }
    }

    pub fn ready(command: &str, transaction_id: &TransactionId) -> Self {
        Self::with_status("ready", command, transaction_id)
    }

    pub fn error(command: &str, transaction_id: &TransactionId, message: impl fmt::Display) -> Self {
        Self::with_status("error", command, transaction_id).with("error_message", message.to_string())
    }

    pub fn not_connected(command: &str, transaction_id: &TransactionId) -> Self {
        Self::error(command, transaction_id, NOT_CONNECTED_MESSAGE)
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.body.insert(key.to_string(), value.into());
        self
    }

    /// Tag an aggregator result with the device it belongs to
    pub fn with_area(self, area_uuid: &str) -> Self {
        self.with("area_uuid", area_uuid)
    }

    pub fn is_ready(&self) -> bool {
        self.body.get("status").and_then(Value::as_str) == Some("ready")
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ready_response() {
        let response = Response::ready("offer", &TransactionId::from("t1")).with("offer", "{}");
        assert!(response.is_ready());
        assert_eq!(
            response.into_value(),
            json!({"command": "offer", "status": "ready", "transaction_id": "t1", "offer": "{}"})
        );
    }

    #[test]
    fn test_error_response_keeps_token() {
        let value = Response::not_connected("bid", &TransactionId::from(json!(42))).into_value();
        assert_eq!(value["status"], "error");
        assert_eq!(value["transaction_id"], 42);
        assert_eq!(value["error_message"], NOT_CONNECTED_MESSAGE);
    }

    #[test]
    fn test_area_tag() {
        let value = Response::ready("list_bids", &TransactionId::default()).with_area("u-1").into_value();
        assert_eq!(value["area_uuid"], "u-1");
        assert!(value["transaction_id"].is_null());
    }
}
