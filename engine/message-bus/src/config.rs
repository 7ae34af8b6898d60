//! Configuration for the in-memory bus

use serde::{Deserialize, Serialize};

use crate::DEFAULT_DELIVERY_THREADS;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Delivery threads started for every session
    pub delivery_threads: usize,

    /// Keep a log of every published message; the log is never trimmed, so
    /// only tests and scripted clients turn it on
    pub record_history: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { delivery_threads: DEFAULT_DELIVERY_THREADS, record_history: false }
    }
}

impl BusConfig {
    /// Default configuration with the message log enabled
    pub fn recording() -> Self {
        Self { record_history: true, ..Self::default() }
    }
}
