//! ExternalGateway - external control of simulated market participants
//!
//! This crate sits between the message bus and the market simulation. It
//! admits commands arriving on arbitrary delivery threads, queues them per
//! device, and applies them exactly once per tick on the simulation's own
//! thread. Bulk "aggregator" commands take a separate synchronous path that
//! runs under the device's exclusion lock. Market event broadcasts are
//! decoded and handed to the simulation's listeners on a bounded worker pool,
//! then acknowledged.

pub mod admission;
pub mod aggregator;
pub mod apply;
pub mod channels;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod events;
pub mod gateway;
pub mod pending;
pub mod request;
pub mod responses;
pub mod stats;
pub mod subscriber;
pub mod worker_pool;


pub use channels::{market_notify_channel, market_notify_response_channel, DeviceChannels};
pub use config::{GatewayConfig, PrefixMode, SubscriberConfig};
pub use connection::{ConnectionPhase, ConnectionState};
pub use device::{DeviceContext, FallbackStrategy};
pub use error::{GatewayError, GatewayResult};
pub use events::{EventArgs, MarketEvent, NotifyEvent};
pub use gateway::ExternalGateway;
pub use pending::PendingRequestQueue;
pub use request::{AggregatorCommand, Command, CommandKind, IncomingRequest, OrderArgs, TransactionId};
pub use responses::Response;
pub use stats::{GatewayStats, GatewayStatsSnapshot};
pub use subscriber::{BroadcastHub, MarketEventListener, MarketEventSubscriber};
pub use worker_pool::{CancelToken, DrainReport, WorkerPool};

/// Share of a slot, in percent, between two tick notifications
pub const DEFAULT_DISPATCH_TICK_FREQUENCY_PERCENT: u64 = 10;

/// Default number of ticks per slot
pub const DEFAULT_TICKS_PER_SLOT: u64 = 60;

/// Concurrent event-processing tasks
pub const DEFAULT_WORKER_CAPACITY: usize = 10;

/// Per-task wait during the drain at market rotation
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5000;
