//! Market event broadcast subscriber
//!
//! One subscription per active market. Delivery threads only decode the
//! message and queue it on the worker pool; the simulation's listeners run on
//! a pool thread, after which the acknowledgement is published. On market
//! rotation the pool is drained, the old transport session is reset and a
//! fresh one subscribes to the new set of markets, so no handler from the
//! previous slot runs against the new slot's state.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use energy_market::MarketArea;
use message_bus::{Callback, CallbackMap, Connector, Payload, Transport};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::channels::{market_notify_channel, market_notify_response_channel};
use crate::config::SubscriberConfig;
use crate::error::GatewayResult;
use crate::events::{EventArgs, MarketEvent, NotifyEvent};
use crate::worker_pool::{DrainReport, WorkerPool};

/// Receives market events inside the simulation
pub trait MarketEventListener: Send + Sync {
    fn on_market_event(&self, event: MarketEvent, args: &EventArgs) -> anyhow::Result<()>;
}

/// Fans every event out to all registered listeners
#[derive(Default)]
pub struct BroadcastHub {
    listeners: RwLock<Vec<Arc<dyn MarketEventListener>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn MarketEventListener>) {
        self.listeners.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl MarketEventListener for BroadcastHub {
    /// Every listener sees the event even when an earlier one fails
    fn on_market_event(&self, event: MarketEvent, args: &EventArgs) -> anyhow::Result<()> {
        let listeners = self.listeners.read().clone();
        let mut failures = Vec::new();
        for listener in listeners {
            if let Err(e) = listener.on_market_event(event, args) {
                failures.push(format!("{:#}", e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("{} listener(s) failed: {}", failures.len(), failures.join("; ")))
        }
    }
}

pub struct MarketEventSubscriber {
    area: Arc<MarketArea>,
    listener: Arc<dyn MarketEventListener>,
    connector: Arc<dyn Connector>,
    session: Mutex<Option<Arc<dyn Transport>>>,
    pool: Arc<WorkerPool>,
    config: SubscriberConfig,
}

impl MarketEventSubscriber {
    pub fn new(
        area: Arc<MarketArea>,
        listener: Arc<dyn MarketEventListener>,
        connector: Arc<dyn Connector>,
        config: SubscriberConfig,
    ) -> GatewayResult<Self> {
        config.validate()?;
        let pool = Arc::new(WorkerPool::new("event", config.worker_capacity)?);
        Ok(Self { area, listener, connector, session: Mutex::new(None), pool, config })
    }

    /// Subscribe to the broadcast channel of every active market
    ///
    /// Opens a transport session first if there is none.
    pub fn subscribe_to_events(&self) -> GatewayResult<Vec<String>> {
        let transport = {
            let mut session = self.session.lock();
            match session.as_ref() {
                Some(transport) => transport.clone(),
                None => {
                    let transport = self.connector.connect()?;
                    *session = Some(transport.clone());
                    transport
                }
            }
        };

        let mut callbacks: CallbackMap = HashMap::new();
        for market in self.area.all_markets() {
            let market_id = market.id().to_string();
            callbacks.insert(
                market_notify_channel(&market_id),
                self.notify_callback(market_id, Arc::downgrade(&transport)),
            );
        }

        let channels: Vec<String> = callbacks.keys().cloned().collect();
        transport.subscribe(callbacks)?;
        debug!("Subscribed to market event channels {:?}", channels);
        Ok(channels)
    }

    /// Rebuild all subscriptions for the markets of the new slot
    ///
    /// Never fails: drain timeouts and transport errors are logged.
    pub fn cycle_market_channels(&self) -> DrainReport {
        let report = self.pool.drain(self.config.drain_timeout());
        if report.failed > 0 || report.timed_out > 0 {
            warn!(
                "Market event cleanup: {} failed, {} timed out of {} tasks",
                report.failed,
                report.timed_out,
                report.total()
            );
        }

        if let Some(old) = self.session.lock().take() {
            if let Err(e) = old.reset() {
                debug!("Error when resetting market event session: {}", e);
            }
        }

        match self.subscribe_to_events() {
            Ok(channels) => info!("Resubscribed to {} market event channel(s)", channels.len()),
            Err(e) => error!("Failed to resubscribe to market events: {}", e),
        }
        report
    }

    /// Event tasks queued or running
    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    fn notify_callback(&self, market_id: String, transport: Weak<dyn Transport>) -> Callback {
        let listener = self.listener.clone();
        let pool = self.pool.clone();

        Arc::new(move |payload: Payload| {
            let event = match NotifyEvent::decode(&market_id, &payload.data) {
                Ok(event) => event,
                Err(e) => {
                    error!("Dropping undecodable event on {}: {}", payload.channel, e);
                    return;
                }
            };

            let listener = listener.clone();
            let transport = transport.clone();
            let market_id = market_id.clone();
            pool.submit(move |_| {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    listener.on_market_event(event.event_type, &event.args)
                }));
                publish_ack(&transport, &market_id, &event);

                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("listener panicked on {} event", event.event_type)),
                }
            });
        })
    }
}

fn publish_ack(transport: &Weak<dyn Transport>, market_id: &str, event: &NotifyEvent) {
    let Some(transport) = transport.upgrade() else {
        warn!("Session for market {} is gone, {} event not acknowledged", market_id, event.event_type);
        return;
    };
    let channel = market_notify_response_channel(market_id);
    if let Err(e) = transport.publish_json(&channel, &event.ack()) {
        error!("Failed to acknowledge {} event on {}: {}", event.event_type, channel, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use energy_market::AreaConfig;
    use message_bus::InMemoryBus;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingListener {
        seen: AtomicUsize,
        fail_on: Option<MarketEvent>,
    }

    impl MarketEventListener for CountingListener {
        fn on_market_event(&self, event: MarketEvent, _args: &EventArgs) -> anyhow::Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if Some(event) == self.fail_on {
                anyhow::bail!("cannot handle {}", event);
            }
            Ok(())
        }
    }

    fn setup(fail_on: Option<MarketEvent>) -> (InMemoryBus, Arc<MarketArea>, Arc<CountingListener>, MarketEventSubscriber) {
        let bus = InMemoryBus::recording();
        let area = Arc::new(MarketArea::new("grid", Utc::now(), AreaConfig::default()));
        let listener = Arc::new(CountingListener { seen: AtomicUsize::new(0), fail_on });
        let subscriber = MarketEventSubscriber::new(
            area.clone(),
            listener.clone(),
            Arc::new(bus.clone()),
            SubscriberConfig::default(),
        )
        .unwrap();
        (bus, area, listener, subscriber)
    }

    fn event(event_type: u8, token: &str) -> String {
        json!({"event_type": event_type, "kwargs": {}, "transaction_uuid": token}).to_string()
    }

    #[test]
    fn test_event_is_acknowledged_after_listeners() {
        let (bus, area, listener, subscriber) = setup(None);
        subscriber.subscribe_to_events().unwrap();

        let market_id = area.next_market().id().to_string();
        bus.publish(&market_notify_channel(&market_id), event(1, "u-1"));

        let acks = bus.wait_for(&market_notify_response_channel(&market_id), 1, Duration::from_secs(2));
        assert_eq!(acks, vec![json!({"response": "offer", "event_type_id": 1, "transaction_uuid": "u-1"})]);
        assert_eq!(listener.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_failure_still_acknowledged() {
        let (bus, area, _listener, subscriber) = setup(Some(MarketEvent::OfferDeleted));
        subscriber.subscribe_to_events().unwrap();

        let market_id = area.next_market().id().to_string();
        let channel = market_notify_channel(&market_id);
        bus.publish(&channel, event(3, "bad"));
        bus.publish(&channel, "garbage");
        bus.publish(&channel, event(4, "good"));

        let acks = bus.wait_for(&market_notify_response_channel(&market_id), 2, Duration::from_secs(2));
        assert_eq!(acks.len(), 2);

        let report = subscriber.cycle_market_channels();
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_rotation_moves_subscription_to_new_market() {
        let (bus, area, listener, subscriber) = setup(None);
        subscriber.subscribe_to_events().unwrap();
        let old_market = area.next_market().id().to_string();

        area.cycle_markets();
        subscriber.cycle_market_channels();
        let new_market = area.next_market().id().to_string();

        assert_eq!(bus.subscriber_count(&market_notify_channel(&old_market)), 0);
        assert_eq!(bus.subscriber_count(&market_notify_channel(&new_market)), 1);

        bus.publish(&market_notify_channel(&old_market), event(1, "stale"));
        bus.publish(&market_notify_channel(&new_market), event(1, "fresh"));
        let acks = bus.wait_for(&market_notify_response_channel(&new_market), 1, Duration::from_secs(2));
        assert_eq!(acks.len(), 1);
        subscriber.cycle_market_channels();
        assert!(bus.published(&market_notify_response_channel(&old_market)).is_empty());
        assert_eq!(listener.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hub_reaches_every_listener() {
        let hub = BroadcastHub::new();
        let failing = Arc::new(CountingListener { seen: AtomicUsize::new(0), fail_on: Some(MarketEvent::Offer) });
        let healthy = Arc::new(CountingListener { seen: AtomicUsize::new(0), fail_on: None });
        hub.add_listener(failing.clone());
        hub.add_listener(healthy.clone());

        assert!(hub.on_market_event(MarketEvent::Offer, &EventArgs::default()).is_err());
        assert_eq!(failing.seen.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.seen.load(Ordering::SeqCst), 1);
        assert_eq!(hub.len(), 2);
    }
}
