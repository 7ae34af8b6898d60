//! Component wiring: bus, market area, device gateways, market event
//! subscriber, aggregators and the clock

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use chrono::Utc;
use energy_market::{AreaConfig, Device, MarketArea};
use external_gateway::{BroadcastHub, ExternalGateway, GatewayStatsSnapshot, MarketEventSubscriber};
use message_bus::{AggregatorChannel, InMemoryBus, Transport};
use simulation_clock::{ClockMetrics, SimulationClock};

use crate::config::ServiceConfig;

/// Point-in-time view of one device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub name: String,
    pub uuid: String,
    pub channel_prefix: String,
    pub connected: bool,
    pub aggregator_controlled: bool,
    pub pending_requests: usize,
    pub stats: GatewayStatsSnapshot,
}

/// Point-in-time view of the whole service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub clock: ClockMetrics,
    pub devices: Vec<DeviceStatus>,
}

/// A running deployment
pub struct DispatchService {
    config: ServiceConfig,
    bus: InMemoryBus,
    area: Arc<MarketArea>,
    gateways: Vec<Arc<ExternalGateway>>,
    aggregators: BTreeMap<String, Arc<AggregatorChannel>>,
    clock: Arc<SimulationClock>,
}

impl DispatchService {
    /// Build and wire every component; devices start disconnected
    pub fn new(config: ServiceConfig) -> Result<Self> {
        info!("Initializing service components...");
        let bus = InMemoryBus::new(config.bus.clone());
        let area = Arc::new(MarketArea::new(
            config.service.area_name.clone(),
            Utc::now(),
            AreaConfig { slot_length_minutes: config.clock.slot_length_minutes },
        ));

        let mut aggregators: BTreeMap<String, Arc<AggregatorChannel>> = BTreeMap::new();
        let mut gateways = Vec::with_capacity(config.devices.len());
        for spec in &config.devices {
            let device = Arc::new(match &spec.uuid {
                Some(uuid) => Device::with_uuid(spec.name.clone(), uuid.clone()),
                None => Device::new(spec.name.clone()),
            });
            let transport: Arc<dyn Transport> =
                Arc::new(bus.session().context("Failed to open bus session")?);
            let gateway = Arc::new(
                ExternalGateway::new(device, area.clone(), transport, spec.storage.clone(), config.gateway_config())
                    .with_context(|| format!("Failed to create gateway for {}", spec.name))?,
            );
            gateway.activate().with_context(|| format!("Failed to activate gateway for {}", spec.name))?;

            if let Some(aggregator_id) = &spec.aggregator {
                let channel = match aggregators.get(aggregator_id) {
                    Some(channel) => channel.clone(),
                    None => {
                        let transport: Arc<dyn Transport> =
                            Arc::new(bus.session().context("Failed to open bus session")?);
                        let channel = AggregatorChannel::new(aggregator_id.clone(), transport);
                        channel
                            .start()
                            .with_context(|| format!("Failed to start aggregator {}", aggregator_id))?;
                        aggregators.insert(aggregator_id.clone(), channel.clone());
                        channel
                    }
                };
                gateway.attach_aggregator(channel);
            }
            gateways.push(gateway);
        }

        let hub = Arc::new(BroadcastHub::new());
        for gateway in &gateways {
            hub.add_listener(gateway.clone());
        }
        let subscriber = Arc::new(
            MarketEventSubscriber::new(area.clone(), hub, Arc::new(bus.clone()), config.subscriber.clone())
                .context("Failed to create market event subscriber")?,
        );
        let channels = subscriber.subscribe_to_events().context("Failed to subscribe to market events")?;
        info!("Listening on {} market event channel(s)", channels.len());

        let clock = SimulationClock::new(area.clone(), config.clock.clone())
            .context("Failed to create SimulationClock")?
            .with_subscriber(subscriber);
        for gateway in &gateways {
            clock.register_device(gateway.clone()).context("Failed to register device with clock")?;
        }
        for aggregator in aggregators.values() {
            clock.add_aggregator(aggregator.clone());
        }

        info!(
            "Service ready: area {} with {} device(s) and {} aggregator(s)",
            area.name(),
            gateways.len(),
            aggregators.len()
        );
        Ok(Self { config, bus, area, gateways, aggregators, clock: Arc::new(clock) })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Broker handle; clients in the same process talk to the devices through it
    pub fn bus(&self) -> &InMemoryBus {
        &self.bus
    }

    pub fn area(&self) -> &Arc<MarketArea> {
        &self.area
    }

    pub fn clock(&self) -> &Arc<SimulationClock> {
        &self.clock
    }

    pub fn gateway(&self, name: &str) -> Option<&Arc<ExternalGateway>> {
        self.gateways.iter().find(|g| g.device().name == name)
    }

    pub fn aggregator(&self, aggregator_id: &str) -> Option<&Arc<AggregatorChannel>> {
        self.aggregators.get(aggregator_id)
    }

    /// Run the clock until stopped or the configured slot limit is reached
    pub async fn run(&self) -> Result<()> {
        self.clock.run_clock_loop().await.context("SimulationClock failed")
    }

    pub fn stop(&self) {
        self.clock.stop();
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            clock: self.clock.get_metrics(),
            devices: self
                .gateways
                .iter()
                .map(|gateway| DeviceStatus {
                    name: gateway.device().name.clone(),
                    uuid: gateway.device().uuid.clone(),
                    channel_prefix: gateway.channels().prefix().to_string(),
                    connected: gateway.is_connected(),
                    aggregator_controlled: gateway.is_aggregator_controlled(),
                    pending_requests: gateway.pending_requests(),
                    stats: gateway.stats(),
                })
                .collect(),
        }
    }

    /// Release aggregators and log the final counters
    pub fn shutdown(&self) {
        for gateway in &self.gateways {
            gateway.detach_aggregator();
        }
        match serde_json::to_string(&self.status()) {
            Ok(status) => info!("Final status: {}", status),
            Err(e) => tracing::warn!("Could not serialize final status: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceSpec;
    use serde_json::json;
    use std::time::Duration;

    fn test_config() -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.clock.ticks_per_slot = 4;
        config.clock.tick_cadence_ms = 0;
        config.clock.max_slots = Some(2);
        config.bus.record_history = true;
        let mut battery = DeviceSpec::new("battery");
        battery.aggregator = Some("agg-1".to_string());
        config.devices = vec![DeviceSpec::new("storage"), battery];
        config
    }

    #[test]
    fn test_wiring() {
        let service = DispatchService::new(test_config()).unwrap();

        let status = service.status();
        assert_eq!(status.devices.len(), 2);
        assert_eq!(status.devices[0].channel_prefix, "storage");
        assert!(!status.devices[0].aggregator_controlled);
        assert!(status.devices[1].aggregator_controlled);
        assert!(service.aggregator("agg-1").is_some());
        assert_eq!(service.gateway("storage").unwrap().config().ticks_per_slot, 4);
    }

    #[test]
    fn test_default_bus_does_not_grow_with_traffic() {
        let mut config = ServiceConfig::default();
        config.clock.ticks_per_slot = 4;
        config.devices = vec![DeviceSpec::new("storage")];
        let service = DispatchService::new(config).unwrap();

        let storage = service.gateway("storage").unwrap().clone();
        storage.register(&json!({"transaction_id": "r"}).to_string());
        for _ in 0..40 {
            service.clock().advance_tick();
        }

        assert!(storage.is_connected());
        assert!(service.bus().history().is_empty());
    }

    #[tokio::test]
    async fn test_run_until_slot_limit() {
        let service = DispatchService::new(test_config()).unwrap();
        service.bus().publish("storage/register_participant", json!({"transaction_id": "r"}).to_string());
        service.bus().wait_for("storage/response/register_participant", 1, Duration::from_secs(2));

        tokio_test::assert_ok!(service.run().await);

        let status = service.status();
        assert_eq!(status.clock.slots_completed, 2);
        assert!(status.devices[0].connected);
        assert_eq!(service.bus().published("storage/events/market").len(), 2);
        assert_eq!(service.bus().published("aggregator/agg-1/events/market").len(), 2);

        service.shutdown();
        assert!(!service.gateway("battery").unwrap().is_aggregator_controlled());
    }
}
