//! Per-device command counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of a gateway's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStatsSnapshot {
    /// Commands accepted into the pending queue
    pub admitted: u64,

    /// Commands answered with an error at admission
    pub rejected: u64,

    /// Queued commands applied successfully
    pub applied: u64,

    /// Queued commands that failed during apply
    pub failed: u64,

    /// Queued commands discarded at slot rotation
    pub dropped_at_rotation: u64,

    /// Commands executed on the aggregator path
    pub aggregator_commands: u64,

    /// Tick notifications published
    pub tick_events: u64,
}

#[derive(Debug, Default)]
pub struct GatewayStats {
    admitted: AtomicU64,
    rejected: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
    dropped_at_rotation: AtomicU64,
    aggregator_commands: AtomicU64,
    tick_events: AtomicU64,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_applied(&self, success: bool) {
        if success {
            self.applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_dropped(&self, count: usize) {
        self.dropped_at_rotation.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_aggregator_command(&self) {
        self.aggregator_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_event(&self) {
        self.tick_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GatewayStatsSnapshot {
        GatewayStatsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped_at_rotation: self.dropped_at_rotation.load(Ordering::Relaxed),
            aggregator_commands: self.aggregator_commands.load(Ordering::Relaxed),
            tick_events: self.tick_events.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = GatewayStats::new();
        stats.record_admitted();
        stats.record_admitted();
        stats.record_rejected();
        stats.record_applied(true);
        stats.record_applied(false);
        stats.record_dropped(3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.admitted, 2);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.applied, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.dropped_at_rotation, 3);
        assert_eq!(snapshot.aggregator_commands, 0);
    }
}
