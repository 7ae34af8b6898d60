//! MessageBus - publish/subscribe transport for external device control
//!
//! Subscribers register a map of channel → callback; callbacks run on the
//! session's own delivery threads, never on the publisher's thread. A session
//! can be reset, which drops every subscription and abandons buffered
//! deliveries, and a fresh one opened through a [`Connector`].

pub mod aggregator;
pub mod config;
pub mod error;
pub mod memory;
pub mod transport;

pub use aggregator::{AggregatorChannel, AggregatorHandler};
pub use config::BusConfig;
pub use error::{BusError, BusResult};
pub use memory::{BusSession, InMemoryBus};
pub use transport::{Callback, CallbackMap, Connector, Payload, Transport};

/// Default number of delivery threads per session
pub const DEFAULT_DELIVERY_THREADS: usize = 4;
