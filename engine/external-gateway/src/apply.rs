//! Tick-bound application of queued requests
//!
//! Runs on the simulation thread with the device lock held. Every request
//! produces exactly one response on its own response channel; a failing
//! request is answered with an error and does not affect the others.

use std::panic::{catch_unwind, AssertUnwindSafe};

use energy_market::Market;
use serde_json::Value;
use tracing::error;

use crate::device::{list_bids, list_offers, DeviceContext};
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::ExternalGateway;
use crate::request::{Command, IncomingRequest, TransactionId};
use crate::responses::Response;

impl ExternalGateway {
    /// Apply everything queued so far, last admitted first
    pub(crate) fn apply_pending(&self, context: &mut DeviceContext, market: &Market) -> usize {
        let batch = self.pending.drain_lifo();
        let applied = batch.len();
        for request in batch {
            self.apply_request(context, market, request);
        }
        applied
    }

    fn apply_request(&self, context: &mut DeviceContext, market: &Market, request: IncomingRequest) {
        let IncomingRequest { command, transaction_id, response_channel } = request;
        let command_name = command.kind().command_name();

        let outcome = catch_unwind(AssertUnwindSafe(|| self.execute(context, market, &command, &transaction_id)))
            .unwrap_or_else(|_| Err(GatewayError::Application("request handler panicked".to_string())));

        let response = outcome.unwrap_or_else(|e| {
            error!(
                "Error when handling {} on area {}: {}, arguments: {:?}",
                command_name, self.device.name, e, command
            );
            Response::error(
                command_name,
                &transaction_id,
                format!("Error when handling {} on area {}: {}", command_name, self.device.name, e),
            )
        });

        self.stats.record_applied(response.is_ready());
        self.publish(&response_channel, &response.into_value());
    }

    fn execute(
        &self,
        context: &mut DeviceContext,
        market: &Market,
        command: &Command,
        transaction_id: &TransactionId,
    ) -> GatewayResult<Response> {
        let name = self.device.name.as_str();
        let ready = Response::ready(command.kind().command_name(), transaction_id);

        let response = match command {
            Command::Offer(args) => {
                let offer = context.post_offer(market, name, *args)?;
                ready.with("offer", offer.to_json_string())
            }
            Command::DeleteOffer { offer_id } => {
                ready.with("deleted_offers", context.delete_offers(market, offer_id.as_deref())?)
            }
            Command::ListOffers => ready.with("offer_list", list_offers(market, name)),
            Command::Bid(args) => {
                let bid = context.post_bid(market, name, *args)?;
                ready.with("bid", bid.to_json_string())
            }
            Command::DeleteBid { bid_id } => {
                ready.with("deleted_bids", context.delete_bids(market, bid_id.as_deref())?)
            }
            Command::ListBids => ready.with("bid_list", list_bids(market, name)),
            Command::DeviceInfo => ready
                .with("device_info", context.device_info(market))
                .with("device_stats", Value::Object(self.device.stats.non_null_stats()))
                .with("market_stats", Value::Object(self.area.stats.non_null_stats())),
        };
        Ok(response)
    }
}
