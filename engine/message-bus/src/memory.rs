//! In-process broker with concurrent delivery threads per session

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, trace};

use crate::config::BusConfig;
use crate::error::{BusError, BusResult};
use crate::transport::{Callback, CallbackMap, Connector, Payload, Transport};

struct Delivery {
    payload: Payload,
    callback: Callback,
}

struct Route {
    session_id: u64,
    callback: Callback,
    sender: Sender<Delivery>,
}

struct BusInner {
    config: BusConfig,
    topics: DashMap<String, Vec<Route>>,
    history: Mutex<Vec<Payload>>,
    next_session_id: AtomicU64,
}

impl BusInner {
    fn publish(&self, channel: &str, data: String) {
        let payload = Payload::new(channel, data);
        if self.config.record_history {
            self.history.lock().push(payload.clone());
        }

        let routes: Vec<(Callback, Sender<Delivery>)> = self
            .topics
            .get(channel)
            .map(|routes| routes.iter().map(|r| (r.callback.clone(), r.sender.clone())).collect())
            .unwrap_or_default();

        for (callback, sender) in routes {
            if sender.send(Delivery { payload: payload.clone(), callback }).is_err() {
                trace!("Dropping delivery on {}: session already stopped", channel);
            }
        }
    }
}

/// In-memory publish/subscribe broker
///
/// Cloning the bus yields another handle to the same broker.
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl InMemoryBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                topics: DashMap::new(),
                history: Mutex::new(Vec::new()),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Bus that logs every published message, for tests and scripted clients
    pub fn recording() -> Self {
        Self::new(BusConfig::recording())
    }

    /// Open a new session with its own delivery threads
    pub fn session(&self) -> BusResult<BusSession> {
        BusSession::open(self.inner.clone())
    }

    /// Publish from outside any session (external clients)
    pub fn publish(&self, channel: &str, data: impl Into<String>) {
        self.inner.publish(channel, data.into());
    }

    pub fn publish_json(&self, channel: &str, value: &Value) -> BusResult<()> {
        self.inner.publish(channel, serde_json::to_string(value)?);
        Ok(())
    }

    /// Every message published so far; empty unless `record_history` is set
    pub fn history(&self) -> Vec<Payload> {
        self.inner.history.lock().clone()
    }

    /// JSON bodies published on one channel, in publish order
    pub fn published(&self, channel: &str) -> Vec<Value> {
        self.inner
            .history
            .lock()
            .iter()
            .filter(|p| p.channel == channel)
            .filter_map(|p| p.json().ok())
            .collect()
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner.topics.get(channel).map(|routes| routes.len()).unwrap_or(0)
    }

    /// Poll until at least `count` messages were published on `channel` or the
    /// timeout expires; returns whatever was published.
    pub fn wait_for(&self, channel: &str, count: usize, timeout: Duration) -> Vec<Value> {
        let deadline = Instant::now() + timeout;
        loop {
            let published = self.published(channel);
            if published.len() >= count || Instant::now() >= deadline {
                return published;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }
}

impl Connector for InMemoryBus {
    fn connect(&self) -> BusResult<Arc<dyn Transport>> {
        Ok(Arc::new(self.session()?))
    }
}

/// A resettable session on the in-memory bus
pub struct BusSession {
    id: u64,
    bus: Arc<BusInner>,
    sender: Mutex<Option<Sender<Delivery>>>,
    closed: Arc<AtomicBool>,
    channels: Mutex<Vec<String>>,
}

fn deliver_loop(session_id: u64, receiver: Receiver<Delivery>, closed: Arc<AtomicBool>) {
    while let Ok(delivery) = receiver.recv() {
        if closed.load(Ordering::Acquire) {
            continue;
        }
        let channel = delivery.payload.channel.clone();
        let callback = delivery.callback;
        let payload = delivery.payload;
        if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
            error!("Callback for {} panicked on session {}", channel, session_id);
        }
    }
    trace!("Delivery thread of session {} stopped", session_id);
}

impl BusSession {
    fn open(bus: Arc<BusInner>) -> BusResult<Self> {
        let id = bus.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = unbounded();
        let closed = Arc::new(AtomicBool::new(false));

        for n in 0..bus.config.delivery_threads.max(1) {
            let receiver = receiver.clone();
            let closed = closed.clone();
            thread::Builder::new()
                .name(format!("bus-{id}-delivery-{n}"))
                .spawn(move || deliver_loop(id, receiver, closed))?;
        }

        debug!("Opened bus session {}", id);
        Ok(Self {
            id,
            bus,
            sender: Mutex::new(Some(sender)),
            closed,
            channels: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Transport for BusSession {
    fn publish(&self, channel: &str, data: String) -> BusResult<()> {
        if self.is_closed() {
            return Err(BusError::SessionClosed(self.id));
        }
        self.bus.publish(channel, data);
        Ok(())
    }

    fn subscribe(&self, callbacks: CallbackMap) -> BusResult<()> {
        if self.is_closed() {
            return Err(BusError::SessionClosed(self.id));
        }
        let sender = self.sender.lock().clone().ok_or(BusError::SessionClosed(self.id))?;

        let mut channels = self.channels.lock();
        for (channel, callback) in callbacks {
            self.bus.topics.entry(channel.clone()).or_default().push(Route {
                session_id: self.id,
                callback,
                sender: sender.clone(),
            });
            debug!("Session {} subscribed to {}", self.id, channel);
            channels.push(channel);
        }
        Ok(())
    }

    fn reset(&self) -> BusResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for channel in self.channels.lock().drain(..) {
            if let Some(mut routes) = self.bus.topics.get_mut(&channel) {
                routes.retain(|r| r.session_id != self.id);
            }
            self.bus.topics.remove_if(&channel, |_, routes| routes.is_empty());
        }
        self.sender.lock().take();
        debug!("Reset bus session {}", self.id);
        Ok(())
    }
}

impl Drop for BusSession {
    fn drop(&mut self) {
        let _ = self.reset();
    }
}
