//! ExternalGateway - per-device connection lifecycle and event pushes
//!
//! A gateway owns one device's command channels. Commands arrive on bus
//! delivery threads and are only admitted there (see `admission`); all state
//! changes happen in `event_tick` on the simulation thread (see `apply`) or
//! under the same exclusion lock on the aggregator path (see `aggregator`).

use std::collections::HashMap;
use std::sync::Arc;

use energy_market::{Device, Market, MarketArea, StorageConfig, Trade};
use message_bus::{AggregatorChannel, Callback, CallbackMap, Payload, Transport};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::channels::DeviceChannels;
use crate::config::GatewayConfig;
use crate::connection::ConnectionState;
use crate::device::{DeviceContext, FallbackStrategy};
use crate::error::GatewayResult;
use crate::events::{EventArgs, MarketEvent};
use crate::pending::PendingRequestQueue;
use crate::request::{CommandKind, TransactionId};
use crate::responses::Response;
use crate::stats::{GatewayStats, GatewayStatsSnapshot};
use crate::subscriber::MarketEventListener;

/// Trade fields that are simulation bookkeeping only
const INTERNAL_TRADE_FIELDS: [&str; 4] =
    ["already_tracked", "offer_bid_trade_info", "seller_origin", "buyer_origin"];

pub struct ExternalGateway {
    pub(crate) device: Arc<Device>,
    pub(crate) area: Arc<MarketArea>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) channels: DeviceChannels,
    pub(crate) config: GatewayConfig,
    pub(crate) connection: Mutex<ConnectionState>,
    pub(crate) pending: PendingRequestQueue,
    /// Per-device exclusion lock shared by tick apply and the aggregator path
    pub(crate) context: Mutex<DeviceContext>,
    pub(crate) aggregator: RwLock<Option<Arc<AggregatorChannel>>>,
    pub(crate) fallback: Option<Arc<dyn FallbackStrategy>>,
    pub(crate) stats: GatewayStats,
}

impl ExternalGateway {
    pub fn new(
        device: Arc<Device>,
        area: Arc<MarketArea>,
        transport: Arc<dyn Transport>,
        storage: StorageConfig,
        config: GatewayConfig,
    ) -> GatewayResult<Self> {
        config.validate()?;
        let channels = DeviceChannels::for_device(&device, &config.prefix);
        Ok(Self {
            device,
            area,
            transport,
            channels,
            config,
            connection: Mutex::new(ConnectionState::new()),
            pending: PendingRequestQueue::new(),
            context: Mutex::new(DeviceContext::new(storage)),
            aggregator: RwLock::new(None),
            fallback: None,
            stats: GatewayStats::new(),
        })
    }

    /// Strategy that drives the device while nobody controls it externally
    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackStrategy>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn channels(&self) -> &DeviceChannels {
        &self.channels
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_connected()
    }

    pub fn is_aggregator_controlled(&self) -> bool {
        self.aggregator.read().is_some()
    }

    pub fn should_use_default_strategy(&self) -> bool {
        !self.is_connected() && !self.is_aggregator_controlled()
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> GatewayStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run `f` under the device's exclusion lock
    pub fn with_context<R>(&self, f: impl FnOnce(&mut DeviceContext) -> R) -> R {
        f(&mut self.context.lock())
    }

    /// Subscribe to the device's register, unregister and command channels
    pub fn activate(self: &Arc<Self>) -> GatewayResult<()> {
        let mut callbacks: CallbackMap = HashMap::new();
        callbacks.insert(
            self.channels.register(),
            self.route(|gateway, payload| gateway.register(&payload.data)),
        );
        callbacks.insert(
            self.channels.unregister(),
            self.route(|gateway, payload| gateway.unregister(&payload.data)),
        );
        for kind in CommandKind::ALL {
            callbacks.insert(
                self.channels.command(kind),
                self.route(move |gateway, payload| {
                    // Rejections are answered and logged by admit
                    let _ = gateway.admit(kind, &payload.data);
                }),
            );
        }

        self.transport.subscribe(callbacks)?;
        info!("Activated external gateway for {} on {}", self.device.name, self.channels.prefix());
        Ok(())
    }

    fn route<F>(self: &Arc<Self>, handler: F) -> Callback
    where
        F: Fn(&ExternalGateway, &Payload) + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(self);
        Arc::new(move |payload: Payload| {
            if let Some(gateway) = weak.upgrade() {
                handler(&*gateway, &payload);
            }
        })
    }

    /// Stage a connection; always answers "registered"
    pub fn register(&self, data: &str) {
        let transaction_id = transaction_id_of(data);
        self.connection.lock().request_connect();
        let response = Response::ready("register", &transaction_id).with("registered", true);
        self.publish(&self.channels.register_response(), &response.into_value());
        info!("Device {} requested registration", self.device.name);
    }

    /// Stage a disconnection; rejected unless the device is connected
    pub fn unregister(&self, data: &str) {
        let transaction_id = transaction_id_of(data);
        let accepted = self.connection.lock().request_disconnect();
        let response = if accepted {
            info!("Device {} requested unregistration", self.device.name);
            Response::ready("unregister", &transaction_id).with("unregistered", true)
        } else {
            Response::not_connected("unregister", &transaction_id)
        };
        self.publish(&self.channels.unregister_response(), &response.into_value());
    }

    /// Slot boundary: the only place the effective connection flag changes
    pub fn register_on_market_cycle(&self) -> bool {
        let mut connection = self.connection.lock();
        let changed = connection.apply_slot_boundary();
        if changed {
            info!(
                "Device {} is now {}",
                self.device.name,
                if connection.is_connected() { "externally connected" } else { "disconnected" }
            );
        }
        changed
    }

    /// Slot rotation, called after the area has cycled its markets
    ///
    /// Requests still queued from the previous slot are dropped unanswered.
    pub fn event_market_cycle(&self) {
        let dropped = self.pending.reject_all();
        if dropped > 0 {
            debug!("Dropped {} unapplied request(s) of {} at slot rotation", dropped, self.device.name);
            self.stats.record_dropped(dropped);
        }
        self.register_on_market_cycle();

        let market = self.area.next_market();
        if self.should_use_default_strategy() {
            if let Some(fallback) = &self.fallback {
                fallback.event_market_cycle(&mut self.context.lock(), &market);
            }
            return;
        }

        self.connection.lock().reset_tick_counter();
        let past = self.area.current_market();
        let summary = {
            let mut context = self.context.lock();
            context.market_cycle(past.as_deref(), &market);
            self.market_cycle_summary(&context, &market)
        };

        if self.is_connected() {
            self.publish(&self.channels.market_events(), &summary);
        }
        if let Some(aggregator) = self.aggregator.read().as_ref() {
            aggregator.add_batch_market_event(&self.device.uuid, summary);
        }
    }

    fn market_cycle_summary(&self, context: &DeviceContext, market: &Market) -> Value {
        let mut summary = match serde_json::to_value(market.info()) {
            Ok(Value::Object(info)) => info,
            _ => Map::new(),
        };
        summary.insert("device_info".to_string(), context.device_info(market));
        summary.insert("event".to_string(), json!("market"));
        summary.insert("device_bill".to_string(), self.device.stats.bills());
        summary.insert("area_uuid".to_string(), json!(self.device.uuid));
        summary.insert(
            "last_market_stats".to_string(),
            serde_json::to_value(self.area.price_stats_current_market()).unwrap_or(Value::Null),
        );
        Value::Object(summary)
    }

    /// Per-tick entry point on the simulation thread
    pub fn event_tick(&self, current_tick: u64) {
        let market = self.area.next_market();
        if self.should_use_default_strategy() {
            if let Some(fallback) = &self.fallback {
                fallback.event_tick(&mut self.context.lock(), &market);
            }
            return;
        }

        {
            let mut context = self.context.lock();
            context.refresh(&market);
            self.apply_pending(&mut context, &market);
        }
        self.dispatch_tick_event(current_tick);
    }

    /// Publish a tick notification when enough ticks have passed since the
    /// last one
    pub fn dispatch_tick_event(&self, current_tick: u64) -> bool {
        let ticks_per_slot = self.config.ticks_per_slot;
        let tick_in_slot = current_tick % ticks_per_slot;
        {
            let mut connection = self.connection.lock();
            if !connection.is_connected()
                || !connection.take_tick_dispatch(tick_in_slot, self.config.dispatch_tick_frequency())
            {
                return false;
            }
        }

        let event = json!({
            "event": "tick",
            "slot_completion": format!("{}%", tick_in_slot * 100 / ticks_per_slot),
        });
        self.publish(&self.channels.tick_events(), &event);
        self.stats.record_tick_event();
        true
    }

    /// Forward a trade the device took part in to the connected client
    pub fn event_trade(&self, market_id: &str, trade: &Trade) {
        if !trade.involves(&self.device.name) || !self.is_connected() {
            return;
        }
        let mut record = match serde_json::to_value(trade) {
            Ok(Value::Object(record)) => record,
            _ => {
                error!("Could not serialize trade {} of market {}", trade.id, market_id);
                return;
            }
        };
        for field in INTERNAL_TRADE_FIELDS {
            record.remove(field);
        }
        record.insert("event".to_string(), json!("trade"));
        self.publish(&self.channels.trade_events(), &Value::Object(record));
    }

    /// Settings changes are ignored while a client controls the device
    pub fn area_reconfigure_event(&self, settings: &Value) -> bool {
        if self.is_connected() {
            warn!("Ignoring reconfiguration of externally connected device {}", self.device.name);
            return false;
        }
        if let Some(fallback) = &self.fallback {
            fallback.area_reconfigure_event(&mut self.context.lock(), settings);
        }
        true
    }

    pub(crate) fn publish(&self, channel: &str, value: &Value) {
        if let Err(e) = self.transport.publish_json(channel, value) {
            error!("Failed to publish on {} for {}: {}", channel, self.device.name, e);
        }
    }
}

impl MarketEventListener for ExternalGateway {
    fn on_market_event(&self, event: MarketEvent, args: &EventArgs) -> anyhow::Result<()> {
        if matches!(event, MarketEvent::Trade | MarketEvent::BidTraded) {
            if let Some(trade) = args.any_trade() {
                self.event_trade(&args.market_id, trade);
            }
        }
        Ok(())
    }
}

/// Token of a raw payload, `null` when the payload is not JSON
pub(crate) fn transaction_id_of(data: &str) -> TransactionId {
    serde_json::from_str::<Value>(data).map(|v| TransactionId::from_payload(&v)).unwrap_or_default()
}
