//! End-to-end tests: clock, gateways, subscriber and aggregator on one bus

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use energy_market::{AreaConfig, Device, MarketArea, StorageConfig};
use external_gateway::{
    market_notify_channel, market_notify_response_channel, BroadcastHub, ExternalGateway, GatewayConfig,
    MarketEventSubscriber, SubscriberConfig,
};
use message_bus::{AggregatorChannel, InMemoryBus};
use serde_json::json;

use crate::{ClockConfig, ClockError, SimulationClock};

const TICKS_PER_SLOT: u64 = 5;

struct Deployment {
    bus: InMemoryBus,
    clock: Arc<SimulationClock>,
    storage: Arc<ExternalGateway>,
    aggregator: Arc<AggregatorChannel>,
}

fn create_integration_config() -> ClockConfig {
    ClockConfig { ticks_per_slot: TICKS_PER_SLOT, tick_cadence_ms: 0, ..Default::default() }
}

fn deploy(config: ClockConfig) -> Deployment {
    let bus = InMemoryBus::recording();
    let area = Arc::new(MarketArea::new("grid", Utc::now(), AreaConfig::default()));
    let gateway_config = GatewayConfig { ticks_per_slot: TICKS_PER_SLOT, ..Default::default() };

    let mut gateways = Vec::new();
    for name in ["storage", "battery"] {
        let gateway = Arc::new(
            ExternalGateway::new(
                Arc::new(Device::with_uuid(name, format!("{}-uuid", name))),
                area.clone(),
                Arc::new(bus.session().unwrap()),
                StorageConfig::default(),
                gateway_config.clone(),
            )
            .unwrap(),
        );
        gateway.activate().unwrap();
        gateways.push(gateway);
    }

    let hub = Arc::new(BroadcastHub::new());
    for gateway in &gateways {
        hub.add_listener(gateway.clone());
    }
    let subscriber =
        Arc::new(MarketEventSubscriber::new(area.clone(), hub, Arc::new(bus.clone()), SubscriberConfig::default()).unwrap());
    subscriber.subscribe_to_events().unwrap();

    let aggregator = AggregatorChannel::new("agg-1", Arc::new(bus.session().unwrap()));
    aggregator.start().unwrap();
    gateways[1].attach_aggregator(aggregator.clone());

    let clock = SimulationClock::new(area, config).unwrap().with_subscriber(subscriber);
    for gateway in &gateways {
        clock.register_device(gateway.clone()).unwrap();
    }
    clock.add_aggregator(aggregator.clone());

    Deployment { bus, clock: Arc::new(clock), storage: gateways[0].clone(), aggregator }
}

fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[cfg(test)]
#[allow(clippy::module_inception)]
mod integration_tests {
    use super::*;

    #[test]
    fn test_external_client_session() {
        let deployment = deploy(create_integration_config());
        let bus = &deployment.bus;
        let clock = &deployment.clock;

        bus.publish("storage/register_participant", json!({"transaction_id": "reg-1"}).to_string());
        let registered = bus.wait_for("storage/response/register_participant", 1, Duration::from_secs(2));
        assert_eq!(registered[0]["registered"], true);

        for _ in 0..=TICKS_PER_SLOT {
            clock.advance_tick();
        }
        assert!(deployment.storage.is_connected());

        bus.publish("storage/offer", json!({"price": 12.0, "energy": 1.0, "transaction_id": "o-1"}).to_string());
        assert!(wait_until(Duration::from_secs(2), || deployment.storage.pending_requests() == 1));
        assert!(bus.published("storage/response/offer").is_empty());

        clock.advance_tick();
        let responses = bus.published("storage/response/offer");
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["status"], "ready");
        assert_eq!(responses[0]["transaction_id"], "o-1");
        assert_eq!(clock.area().next_market().get_offers().len(), 1);
    }

    #[test]
    fn test_trade_event_reaches_client_and_is_acknowledged() {
        let deployment = deploy(create_integration_config());
        let bus = &deployment.bus;
        deployment.storage.register("{}");
        for _ in 0..=TICKS_PER_SLOT {
            deployment.clock.advance_tick();
        }

        let market_id = deployment.clock.area().next_market().id().to_string();
        let trade = json!({
            "id": "trade-7", "time": Utc::now(), "offer_id": "offer-7", "bid_id": null,
            "seller": "pv", "buyer": "storage", "energy": 1.0, "price": 3.0,
            "already_tracked": false, "offer_bid_trade_info": null,
            "seller_origin": null, "buyer_origin": null,
        });
        let event = json!({"event_type": 4, "kwargs": {"trade": trade}, "transaction_uuid": "ev-1"});
        bus.publish(&market_notify_channel(&market_id), event.to_string());

        let acks = bus.wait_for(&market_notify_response_channel(&market_id), 1, Duration::from_secs(2));
        assert_eq!(acks[0]["transaction_uuid"], "ev-1");
        let trades = bus.published("storage/events/trade");
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0]["id"], "trade-7");
        assert!(trades[0].get("already_tracked").is_none());
    }

    #[test]
    fn test_aggregator_market_events_flushed_at_rotation() {
        let deployment = deploy(create_integration_config());
        let channel = deployment.aggregator.market_events_channel();

        for _ in 0..TICKS_PER_SLOT {
            deployment.clock.advance_tick();
        }
        assert!(deployment.bus.published(&channel).is_empty());

        deployment.clock.advance_tick();
        let flushed = deployment.bus.published(&channel);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0]["event"], "market");
        assert_eq!(flushed[0]["content"]["battery-uuid"]["area_uuid"], "battery-uuid");
        assert_eq!(deployment.aggregator.pending_market_events(), 0);
    }

    #[tokio::test]
    async fn test_clock_loop_stops_at_slot_limit() {
        let config = ClockConfig { max_slots: Some(2), ..create_integration_config() };
        let deployment = deploy(config);

        tokio_test::assert_ok!(deployment.clock.run_clock_loop().await);

        let metrics = deployment.clock.get_metrics();
        assert_eq!(metrics.slots_completed, 2);
        assert_eq!(deployment.clock.get_current_tick(), 2 * TICKS_PER_SLOT + 1);
        assert!(!deployment.clock.is_running());
    }

    #[tokio::test]
    async fn test_clock_loop_runs_until_stopped() {
        let config = ClockConfig { tick_cadence_ms: 1, ..create_integration_config() };
        let clock = deploy(config).clock;

        let runner = clock.clone();
        let handle = tokio::spawn(async move { runner.run_clock_loop().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(clock.is_running());
        assert!(matches!(clock.run_clock_loop().await, Err(ClockError::ClockAlreadyRunning)));

        clock.stop();
        tokio_test::assert_ok!(handle.await.unwrap());
        assert!(clock.get_current_tick() > 0);
    }
}
