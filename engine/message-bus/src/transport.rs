//! Transport abstraction used by gateways and subscribers

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{BusError, BusResult};

/// A message delivered on a channel
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub channel: String,
    pub data: String,
}

impl Payload {
    pub fn new(channel: impl Into<String>, data: impl Into<String>) -> Self {
        Self { channel: channel.into(), data: data.into() }
    }

    /// Decode the payload body as JSON
    pub fn json(&self) -> BusResult<Value> {
        serde_json::from_str(&self.data).map_err(|e| BusError::InvalidPayload {
            channel: self.channel.clone(),
            reason: e.to_string(),
        })
    }
}

/// Subscription callback, invoked on a delivery thread
pub type Callback = Arc<dyn Fn(Payload) + Send + Sync>;

/// Channel name → callback
pub type CallbackMap = HashMap<String, Callback>;

/// A publish/subscribe session
pub trait Transport: Send + Sync {
    fn publish(&self, channel: &str, data: String) -> BusResult<()>;

    fn publish_json(&self, channel: &str, value: &Value) -> BusResult<()> {
        let data = serde_json::to_string(value)?;
        self.publish(channel, data)
    }

    /// Register callbacks for several channels at once
    fn subscribe(&self, callbacks: CallbackMap) -> BusResult<()>;

    /// Drop every subscription and abandon deliveries still buffered
    fn reset(&self) -> BusResult<()>;
}

/// Opens fresh transport sessions
pub trait Connector: Send + Sync {
    fn connect(&self) -> BusResult<Arc<dyn Transport>>;
}
