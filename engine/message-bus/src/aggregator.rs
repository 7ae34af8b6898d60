//! Aggregator sub-channel: batched commands for many devices at once
//!
//! An aggregator publishes one batch per request on
//! `aggregator/<id>/batch_commands`:
//!
//! ```json
//! {"transaction_id": "...", "batch_commands": {"<device_uuid>": [{"type": "offer", ...}]}}
//! ```
//!
//! Every command is handed to the handler registered for its device and the
//! results are published together on `aggregator/<id>/batch_commands/response`.
//! Handlers run on the session's delivery thread, never on the simulation's
//! tick thread.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

use crate::error::{BusError, BusResult};
use crate::transport::{Callback, CallbackMap, Payload, Transport};

/// Executes one aggregator command for a device and returns its result record
pub type AggregatorHandler = Arc<dyn Fn(Value) -> Value + Send + Sync>;

pub struct AggregatorChannel {
    aggregator_id: String,
    transport: Arc<dyn Transport>,
    handlers: DashMap<String, AggregatorHandler>,
    market_events: Mutex<Map<String, Value>>,
}

impl AggregatorChannel {
    pub fn new(aggregator_id: impl Into<String>, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            aggregator_id: aggregator_id.into(),
            transport,
            handlers: DashMap::new(),
            market_events: Mutex::new(Map::new()),
        })
    }

    pub fn aggregator_id(&self) -> &str {
        &self.aggregator_id
    }

    pub fn batch_commands_channel(&self) -> String {
        format!("aggregator/{}/batch_commands", self.aggregator_id)
    }

    pub fn batch_response_channel(&self) -> String {
        format!("aggregator/{}/batch_commands/response", self.aggregator_id)
    }

    pub fn market_events_channel(&self) -> String {
        format!("aggregator/{}/events/market", self.aggregator_id)
    }

    /// Subscribe to the batch command channel
    pub fn start(self: &Arc<Self>) -> BusResult<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let callback: Callback = Arc::new(move |payload: Payload| {
            let Some(channel) = weak.upgrade() else {
                return;
            };
            if let Err(e) = channel.process_batch(&payload.data) {
                error!("Aggregator {} failed to process batch: {}", channel.aggregator_id, e);
            }
        });

        let mut callbacks: CallbackMap = HashMap::new();
        callbacks.insert(self.batch_commands_channel(), callback);
        self.transport.subscribe(callbacks)
    }

    pub fn register_device(&self, device_uuid: &str, handler: AggregatorHandler) {
        self.handlers.insert(device_uuid.to_string(), handler);
        debug!("Device {} joined aggregator {}", device_uuid, self.aggregator_id);
    }

    pub fn unregister_device(&self, device_uuid: &str) -> bool {
        self.handlers.remove(device_uuid).is_some()
    }

    pub fn is_device_registered(&self, device_uuid: &str) -> bool {
        self.handlers.contains_key(device_uuid)
    }

    /// Run every command of a batch and publish the collected results
    pub fn process_batch(&self, data: &str) -> BusResult<Value> {
        let batch: Value = serde_json::from_str(data)?;
        let transaction_id = batch.get("transaction_id").cloned().unwrap_or(Value::Null);
        let commands = batch.get("batch_commands").and_then(Value::as_object).ok_or_else(|| {
            BusError::InvalidPayload {
                channel: self.batch_commands_channel(),
                reason: "missing batch_commands".to_string(),
            }
        })?;

        let mut responses = Map::new();
        for (device_uuid, device_commands) in commands {
            let handler = self.handlers.get(device_uuid).map(|h| h.value().clone());
            let device_commands = match device_commands {
                Value::Array(list) => list.clone(),
                other => vec![other.clone()],
            };

            let results: Vec<Value> = device_commands
                .into_iter()
                .map(|command| match &handler {
                    Some(handler) => handler(command),
                    None => {
                        warn!("Aggregator {} has no device {}", self.aggregator_id, device_uuid);
                        json!({
                            "status": "error",
                            "area_uuid": device_uuid,
                            "error_message": "Device is not controlled by this aggregator.",
                            "transaction_id": command.get("transaction_id").cloned().unwrap_or(Value::Null),
                        })
                    }
                })
                .collect();
            responses.insert(device_uuid.clone(), Value::Array(results));
        }

        let response = json!({
            "status": "ready",
            "command": "batch_commands",
            "transaction_id": transaction_id,
            "responses": responses,
        });
        self.transport.publish_json(&self.batch_response_channel(), &response)?;
        Ok(response)
    }

    /// Collect a device's market-cycle record for the next flush
    pub fn add_batch_market_event(&self, device_uuid: &str, event: Value) {
        self.market_events.lock().insert(device_uuid.to_string(), event);
    }

    pub fn pending_market_events(&self) -> usize {
        self.market_events.lock().len()
    }

    /// Publish every collected market event as one record; returns how many
    /// device events were included.
    pub fn flush_market_events(&self) -> BusResult<usize> {
        let events = std::mem::take(&mut *self.market_events.lock());
        if events.is_empty() {
            return Ok(0);
        }
        let count = events.len();
        self.transport.publish_json(
            &self.market_events_channel(),
            &json!({"event": "market", "content": events}),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBus;
    use std::time::Duration;

    fn channel(bus: &InMemoryBus) -> Arc<AggregatorChannel> {
        let session: Arc<dyn Transport> = Arc::new(bus.session().unwrap());
        AggregatorChannel::new("agg-1", session)
    }

    #[test]
    fn test_process_batch_routes_commands_per_device() {
        let bus = InMemoryBus::recording();
        let aggregator = channel(&bus);
        aggregator.register_device(
            "dev-1",
            Arc::new(|command: Value| {
                json!({"status": "ready", "echo": command["type"], "area_uuid": "dev-1"})
            }),
        );

        let batch = json!({
            "transaction_id": "b1",
            "batch_commands": {
                "dev-1": [{"type": "list_offers", "transaction_id": "c1"}],
                "dev-2": [{"type": "list_bids", "transaction_id": "c2"}],
            }
        });
        let response = aggregator.process_batch(&batch.to_string()).unwrap();

        assert_eq!(response["transaction_id"], "b1");
        assert_eq!(response["responses"]["dev-1"][0]["echo"], "list_offers");
        assert_eq!(response["responses"]["dev-2"][0]["status"], "error");
        assert_eq!(response["responses"]["dev-2"][0]["transaction_id"], "c2");
        assert_eq!(bus.published(&aggregator.batch_response_channel()).len(), 1);
    }

    #[test]
    fn test_batch_delivered_through_subscription() {
        let bus = InMemoryBus::recording();
        let aggregator = channel(&bus);
        aggregator.register_device("dev-1", Arc::new(|_| json!({"status": "ready"})));
        aggregator.start().unwrap();

        bus.publish_json(
            &aggregator.batch_commands_channel(),
            &json!({"transaction_id": "b2", "batch_commands": {"dev-1": [{"type": "list_bids"}]}}),
        )
        .unwrap();

        let responses =
            bus.wait_for(&aggregator.batch_response_channel(), 1, Duration::from_secs(2));
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["transaction_id"], "b2");
    }

    #[test]
    fn test_market_events_flush_once() {
        let bus = InMemoryBus::recording();
        let aggregator = channel(&bus);
        aggregator.add_batch_market_event("dev-1", json!({"event": "market"}));
        aggregator.add_batch_market_event("dev-2", json!({"event": "market"}));
        assert_eq!(aggregator.pending_market_events(), 2);

        assert_eq!(aggregator.flush_market_events().unwrap(), 2);
        assert_eq!(aggregator.flush_market_events().unwrap(), 0);
        let published = bus.published(&aggregator.market_events_channel());
        assert_eq!(published.len(), 1);
        assert!(published[0]["content"]["dev-2"].is_object());
    }

    #[test]
    fn test_invalid_batch_is_rejected() {
        let bus = InMemoryBus::recording();
        let aggregator = channel(&bus);
        assert!(matches!(
            aggregator.process_batch(r#"{"transaction_id": "x"}"#),
            Err(BusError::InvalidPayload { .. })
        ));
        assert!(aggregator.process_batch("not json").is_err());
    }
}
