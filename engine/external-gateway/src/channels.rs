//! Channel naming for device commands, responses, pushed events and market
//! event broadcasts

use energy_market::Device;

use crate::config::PrefixMode;
use crate::request::CommandKind;

/// Topic names under one device's channel prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceChannels {
    prefix: String,
}

impl DeviceChannels {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Derive the prefix from a stable device identifier
    pub fn for_device(device: &Device, mode: &PrefixMode) -> Self {
        match mode {
            PrefixMode::Local => Self::new(device.name.clone()),
            PrefixMode::Collaboration { collaboration_id } => {
                Self::new(format!("external/{}/{}", collaboration_id, device.uuid))
            }
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn register(&self) -> String {
        format!("{}/register_participant", self.prefix)
    }

    pub fn register_response(&self) -> String {
        format!("{}/response/register_participant", self.prefix)
    }

    pub fn unregister(&self) -> String {
        format!("{}/unregister_participant", self.prefix)
    }

    pub fn unregister_response(&self) -> String {
        format!("{}/response/unregister_participant", self.prefix)
    }

    /// Channel a command is received on
    pub fn command(&self, kind: CommandKind) -> String {
        format!("{}/{}", self.prefix, kind.topic())
    }

    /// Channel the response to a command is published on
    pub fn response(&self, kind: CommandKind) -> String {
        format!("{}/response/{}", self.prefix, kind.response_topic())
    }

    pub fn tick_events(&self) -> String {
        format!("{}/events/tick", self.prefix)
    }

    pub fn trade_events(&self) -> String {
        format!("{}/events/trade", self.prefix)
    }

    pub fn market_events(&self) -> String {
        format!("{}/events/market", self.prefix)
    }
}

/// Broadcast channel of one market's events
pub fn market_notify_channel(market_id: &str) -> String {
    format!("market/{}/notify_event", market_id)
}

/// Acknowledgement channel of one market's events
pub fn market_notify_response_channel(market_id: &str) -> String {
    format!("market/{}/notify_event/response", market_id)
}
