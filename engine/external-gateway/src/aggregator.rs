//! Aggregator command path
//!
//! Aggregator batches are executed on the aggregator channel's delivery
//! thread, immediately and under the device's exclusion lock, so they never
//! interleave with tick-time apply for the same device. Results are returned
//! to the batch collector instead of being published here. This path must
//! never be driven from the tick thread while it holds the device lock.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use energy_market::Market;
use message_bus::{AggregatorChannel, AggregatorHandler};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::device::{list_bids, list_offers, DeviceContext};
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::ExternalGateway;
use crate::request::{AggregatorCommand, TransactionId};
use crate::responses::Response;

impl ExternalGateway {
    /// Put the device under control of an aggregator
    pub fn attach_aggregator(self: &Arc<Self>, channel: Arc<AggregatorChannel>) {
        let weak = Arc::downgrade(self);
        let area_uuid = self.device.uuid.clone();
        let handler: AggregatorHandler = Arc::new(move |command: Value| match weak.upgrade() {
            Some(gateway) => gateway.execute_aggregator_command(&command),
            None => Response::error(
                command_type(&command),
                &TransactionId::from_payload(&command),
                "Device is no longer active",
            )
            .with_area(&area_uuid)
            .into_value(),
        });

        channel.register_device(&self.device.uuid, handler);
        info!("Device {} is now controlled by aggregator {}", self.device.name, channel.aggregator_id());
        *self.aggregator.write() = Some(channel);
    }

    /// Release the device from its aggregator. Returns false if it had none.
    pub fn detach_aggregator(&self) -> bool {
        match self.aggregator.write().take() {
            Some(channel) => {
                channel.unregister_device(&self.device.uuid);
                info!("Device {} left aggregator {}", self.device.name, channel.aggregator_id());
                true
            }
            None => false,
        }
    }

    /// Execute one aggregator command now and return its result record
    pub fn execute_aggregator_command(&self, payload: &Value) -> Value {
        let transaction_id = TransactionId::from_payload(payload);
        self.stats.record_aggregator_command();

        let command = match AggregatorCommand::parse(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!("Rejected aggregator command for {}: {}", self.device.name, e);
                return Response::error(command_type(payload), &transaction_id, e)
                    .with_area(&self.device.uuid)
                    .into_value();
            }
        };

        let market = self.area.next_market();
        let outcome = {
            let mut context = self.context.lock();
            catch_unwind(AssertUnwindSafe(|| {
                self.execute_aggregator(&mut context, &market, &command, &transaction_id)
            }))
            .unwrap_or_else(|_| Err(GatewayError::Application("aggregator handler panicked".to_string())))
        };

        let name = command.command_name();
        outcome
            .unwrap_or_else(|e| {
                error!("Error when handling aggregator {} on area {}: {}", name, self.device.name, e);
                Response::error(
                    name,
                    &transaction_id,
                    format!("Error when handling {} on area {}: {}", name, self.device.name, e),
                )
            })
            .with_area(&self.device.uuid)
            .into_value()
    }

    fn execute_aggregator(
        &self,
        context: &mut DeviceContext,
        market: &Market,
        command: &AggregatorCommand,
        transaction_id: &TransactionId,
    ) -> GatewayResult<Response> {
        let name = self.device.name.as_str();
        let ready = Response::ready(command.command_name(), transaction_id);

        let response = match command {
            AggregatorCommand::Offer(args) => {
                ready.with("offer", context.post_offer(market, name, *args)?.to_json_string())
            }
            AggregatorCommand::UpdateOffer(args) => {
                ready.with("offer", context.update_offers(market, name, *args)?.to_json_string())
            }
            AggregatorCommand::DeleteOffer { offer_id } => {
                ready.with("deleted_offers", context.delete_offers(market, offer_id.as_deref())?)
            }
            AggregatorCommand::ListOffers => ready.with("offer_list", list_offers(market, name)),
            AggregatorCommand::Bid(args) => {
                ready.with("bid", context.post_bid(market, name, *args)?.to_json_string())
            }
            AggregatorCommand::UpdateBid(args) => {
                ready.with("bid", context.update_bids(market, name, *args)?.to_json_string())
            }
            AggregatorCommand::DeleteBid { bid_id } => {
                ready.with("deleted_bids", context.delete_bids(market, bid_id.as_deref())?)
            }
            AggregatorCommand::ListBids => ready.with("bid_list", list_bids(market, name)),
        };
        Ok(response)
    }
}

fn command_type(payload: &Value) -> &str {
    payload.get("type").and_then(Value::as_str).unwrap_or("unknown")
}
