//! Core SimulationClock implementation

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use energy_market::MarketArea;
use external_gateway::{ExternalGateway, MarketEventSubscriber};
use message_bus::AggregatorChannel;
use parking_lot::RwLock;

use crate::config::ClockConfig;
use crate::error::{ClockError, ClockResult};
use crate::metrics::{ClockMetrics, MetricsCollector};
use crate::{TickId, DEFAULT_METRICS_HISTORY};

/// What a single call to `advance_tick` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: TickId,
    /// The tick opened a new slot
    pub rotated: bool,
    pub devices: usize,
}

/// Drives logical time for one market area
///
/// All gateway entry points (`event_market_cycle`, `event_tick`) are called
/// from whichever thread calls `advance_tick`, one device after the other.
pub struct SimulationClock {
    current_tick: AtomicU64,
    is_running: AtomicBool,

    area: Arc<MarketArea>,
    devices: RwLock<Vec<Arc<ExternalGateway>>>,
    subscriber: Option<Arc<MarketEventSubscriber>>,
    aggregators: RwLock<Vec<Arc<AggregatorChannel>>>,

    config: ClockConfig,
    metrics_collector: MetricsCollector,
}

impl SimulationClock {
    pub fn new(area: Arc<MarketArea>, config: ClockConfig) -> ClockResult<Self> {
        config.validate()?;
        tracing::info!(
            "Creating SimulationClock for area {} ({} ticks per slot)",
            area.name(),
            config.ticks_per_slot
        );

        Ok(Self {
            current_tick: AtomicU64::new(0),
            is_running: AtomicBool::new(false),
            area,
            devices: RwLock::new(Vec::new()),
            subscriber: None,
            aggregators: RwLock::new(Vec::new()),
            config,
            metrics_collector: MetricsCollector::new(DEFAULT_METRICS_HISTORY),
        })
    }

    /// Market event subscriber rebuilt at every slot rotation
    pub fn with_subscriber(mut self, subscriber: Arc<MarketEventSubscriber>) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    /// Add a device gateway; ticks reach devices in registration order
    pub fn register_device(&self, gateway: Arc<ExternalGateway>) -> ClockResult<()> {
        let ticks_per_slot = gateway.config().ticks_per_slot;
        if ticks_per_slot != self.config.ticks_per_slot {
            return Err(ClockError::Config(format!(
                "device {} expects {} ticks per slot, clock runs {}",
                gateway.device().name,
                ticks_per_slot,
                self.config.ticks_per_slot
            )));
        }

        let mut devices = self.devices.write();
        let uuid = &gateway.device().uuid;
        if devices.iter().any(|d| &d.device().uuid == uuid) {
            return Err(ClockError::DeviceAlreadyRegistered { uuid: uuid.clone() });
        }
        tracing::info!("Registered device {} with SimulationClock", gateway.device().name);
        devices.push(gateway);
        self.metrics_collector.update_active_devices(devices.len());
        Ok(())
    }

    pub fn unregister_device(&self, uuid: &str) -> ClockResult<Arc<ExternalGateway>> {
        let mut devices = self.devices.write();
        let index = devices
            .iter()
            .position(|d| d.device().uuid == uuid)
            .ok_or_else(|| ClockError::DeviceNotRegistered { uuid: uuid.to_string() })?;
        let gateway = devices.remove(index);
        self.metrics_collector.update_active_devices(devices.len());
        tracing::info!("Unregistered device {} from SimulationClock", gateway.device().name);
        Ok(gateway)
    }

    /// Aggregator whose batch market events are flushed at every rotation
    pub fn add_aggregator(&self, aggregator: Arc<AggregatorChannel>) {
        self.aggregators.write().push(aggregator);
    }

    pub fn devices(&self) -> Vec<Arc<ExternalGateway>> {
        self.devices.read().clone()
    }

    pub fn area(&self) -> &Arc<MarketArea> {
        &self.area
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    /// Get current tick
    pub fn get_current_tick(&self) -> TickId {
        self.current_tick.load(Ordering::Relaxed)
    }

    /// Check if clock is running
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Get current metrics
    pub fn get_metrics(&self) -> ClockMetrics {
        self.metrics_collector.get_metrics()
    }

    /// Process one tick
    ///
    /// A tick that is a multiple of `ticks_per_slot` (other than the first)
    /// rotates the slot before the devices see it.
    pub fn advance_tick(&self) -> TickReport {
        let tick_start = Instant::now();
        let tick = self.current_tick.fetch_add(1, Ordering::SeqCst);
        let devices = self.devices();

        let rotated = tick > 0 && tick % self.config.ticks_per_slot == 0;
        if rotated {
            self.rotate_slot(&devices);
        }

        for device in &devices {
            device.event_tick(tick);
        }

        self.metrics_collector.record_tick(tick, tick_start.elapsed());
        TickReport { tick, rotated, devices: devices.len() }
    }

    fn rotate_slot(&self, devices: &[Arc<ExternalGateway>]) {
        let rotation_start = Instant::now();
        let market = self.area.cycle_markets();

        for device in devices {
            device.event_market_cycle();
        }

        if let Some(subscriber) = &self.subscriber {
            subscriber.cycle_market_channels();
        }

        for aggregator in self.aggregators.read().iter() {
            match aggregator.flush_market_events() {
                Ok(0) => {}
                Ok(count) => tracing::debug!(
                    "Flushed {} market event(s) to aggregator {}",
                    count,
                    aggregator.aggregator_id()
                ),
                Err(e) => tracing::error!(
                    "Failed to flush market events to aggregator {}: {}",
                    aggregator.aggregator_id(),
                    e
                ),
            }
        }

        self.metrics_collector.record_rotation(rotation_start.elapsed());
        tracing::info!(
            "Slot {} started, trading in market {}",
            self.metrics_collector.slots_completed(),
            market.id()
        );
    }

    fn slot_limit_reached(&self) -> bool {
        self.config.max_slots.is_some_and(|max| self.metrics_collector.slots_completed() >= max)
    }

    /// Run ticks at the configured cadence until stopped or the slot limit
    /// is reached
    pub async fn run_clock_loop(&self) -> ClockResult<()> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(ClockError::ClockAlreadyRunning);
        }

        tracing::info!("Starting SimulationClock main loop");
        let mut last_metrics_emission = Instant::now();

        while self.is_running.load(Ordering::Relaxed) {
            let tick_start = Instant::now();
            let report = self.advance_tick();

            if report.rotated && self.slot_limit_reached() {
                tracing::info!("Slot limit reached after tick {}", report.tick);
                break;
            }

            if last_metrics_emission.elapsed() >= self.config.metrics_interval() {
                self.emit_metrics();
                last_metrics_emission = Instant::now();
            }

            let elapsed = tick_start.elapsed();
            let cadence = self.config.tick_cadence();
            if elapsed < cadence {
                tokio::time::sleep(cadence - elapsed).await;
            } else {
                tokio::task::yield_now().await;
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        tracing::info!("SimulationClock main loop stopped");
        Ok(())
    }

    /// Stop the SimulationClock after the tick in progress
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::Relaxed);
    }

    fn emit_metrics(&self) {
        let metrics = self.metrics_collector.get_metrics();
        tracing::debug!(
            tick = metrics.current_tick,
            slots = metrics.slots_completed,
            devices = metrics.active_devices,
            avg_tick_ns = metrics.avg_tick_duration_ns,
            max_tick_ns = metrics.max_tick_duration_ns,
            "Tick metrics"
        );
    }
}
