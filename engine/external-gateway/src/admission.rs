//! Command admission on bus delivery threads
//!
//! Admission decides whether a command may be applied at the next tick. It
//! never mutates device or market state and never waits on the device lock.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::ExternalGateway;
use crate::request::{Command, CommandKind, IncomingRequest, TransactionId};
use crate::responses::Response;

impl ExternalGateway {
    /// Validate a raw command received on `kind`'s channel and queue it
    ///
    /// A rejected command is answered immediately on its response channel
    /// with the caller's token and the error is returned.
    pub fn admit(&self, kind: CommandKind, data: &str) -> GatewayResult<()> {
        let response_channel = self.channels.response(kind);
        let payload = serde_json::from_str::<Value>(data);
        let transaction_id = payload.as_ref().map(TransactionId::from_payload).unwrap_or_default();

        let admitted = if self.is_connected() {
            payload
                .map_err(|e| GatewayError::MalformedPayload(e.to_string()))
                .and_then(|payload| self.validate(kind, &payload))
        } else {
            Err(GatewayError::NotConnected)
        };

        match admitted {
            Ok(command) => {
                debug!("Admitted {} {} for {}", kind, transaction_id, self.device.name);
                self.pending.push(IncomingRequest::new(command, transaction_id, response_channel));
                self.stats.record_admitted();
                Ok(())
            }
            Err(e) => {
                warn!("Rejected {} request for {}: {}", kind, self.device.name, e);
                let response = Response::error(kind.command_name(), &transaction_id, &e);
                self.publish(&response_channel, &response.into_value());
                self.stats.record_rejected();
                Err(e)
            }
        }
    }

    fn validate(&self, kind: CommandKind, payload: &Value) -> GatewayResult<Command> {
        let command = Command::parse(kind, payload)?;

        // Stale ids are rejected early when the device lock is free; apply
        // checks again either way.
        let market = self.area.next_market();
        let stale = match (&command, self.context.try_lock()) {
            (Command::DeleteOffer { offer_id: Some(id) }, Some(context)) => {
                (!context.is_offer_posted(&market, id))
                    .then_some("Offer_id is not associated with any posted offer.")
            }
            (Command::DeleteBid { bid_id: Some(id) }, Some(context)) => {
                (!context.is_bid_posted(&market, id)).then_some("Bid_id is not associated with any posted bid.")
            }
            _ => None,
        };
        match stale {
            Some(reason) => Err(GatewayError::InvalidArguments(format!(
                "Incorrect {} request. {}",
                kind, reason
            ))),
            None => Ok(command),
        }
    }
}
