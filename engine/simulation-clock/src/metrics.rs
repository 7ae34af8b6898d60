//! Metrics collection for SimulationClock

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::TickId;

/// Metrics collected by the SimulationClock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockMetrics {
    /// Last tick processed
    pub current_tick: TickId,

    /// Slot rotations performed so far
    pub slots_completed: u64,

    /// Number of registered device gateways
    pub active_devices: u32,

    /// Duration of the last tick in nanoseconds
    pub tick_duration_ns: u64,

    /// Average tick duration over the recent history in nanoseconds
    pub avg_tick_duration_ns: u64,

    /// Maximum tick duration since start in nanoseconds
    pub max_tick_duration_ns: u64,

    /// 95th percentile tick duration over the recent history in nanoseconds
    pub p95_tick_duration_ns: u64,

    /// Duration of the last slot rotation in nanoseconds
    pub last_rotation_ns: u64,

    /// Total ticks processed
    pub total_ticks_processed: u64,

    /// System uptime in seconds
    pub system_uptime_seconds: u64,
}

/// Lock-free collector written by the tick thread and read by anyone
pub struct MetricsCollector {
    current_tick: AtomicU64,
    tick_durations: Vec<AtomicU64>,
    last_tick_duration: AtomicU64,
    max_tick_duration: AtomicU64,
    total_ticks: AtomicU64,

    slots_completed: AtomicU64,
    last_rotation: AtomicU64,
    active_devices: AtomicU64,

    start_time: Instant,
    history_size: usize,
}

impl MetricsCollector {
    pub fn new(history_size: usize) -> Self {
        let history_size = history_size.max(1);
        Self {
            current_tick: AtomicU64::new(0),
            tick_durations: (0..history_size).map(|_| AtomicU64::new(0)).collect(),
            last_tick_duration: AtomicU64::new(0),
            max_tick_duration: AtomicU64::new(0),
            total_ticks: AtomicU64::new(0),
            slots_completed: AtomicU64::new(0),
            last_rotation: AtomicU64::new(0),
            active_devices: AtomicU64::new(0),
            start_time: Instant::now(),
            history_size,
        }
    }

    /// Record a completed tick
    pub fn record_tick(&self, tick: TickId, duration: Duration) {
        let duration_ns = duration.as_nanos() as u64;
        let index = (tick as usize) % self.history_size;

        self.current_tick.store(tick, Ordering::Relaxed);
        self.tick_durations[index].store(duration_ns, Ordering::Relaxed);
        self.last_tick_duration.store(duration_ns, Ordering::Relaxed);
        self.total_ticks.fetch_add(1, Ordering::Relaxed);
        self.max_tick_duration.fetch_max(duration_ns, Ordering::Relaxed);
    }

    /// Record a completed slot rotation
    pub fn record_rotation(&self, duration: Duration) {
        self.slots_completed.fetch_add(1, Ordering::Relaxed);
        self.last_rotation.store(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn update_active_devices(&self, count: usize) {
        self.active_devices.store(count as u64, Ordering::Relaxed);
    }

    pub fn slots_completed(&self) -> u64 {
        self.slots_completed.load(Ordering::Relaxed)
    }

    /// Get current metrics
    pub fn get_metrics(&self) -> ClockMetrics {
        let mut durations: Vec<u64> = self
            .tick_durations
            .iter()
            .map(|d| d.load(Ordering::Relaxed))
            .filter(|&d| d > 0)
            .collect();
        durations.sort_unstable();

        let (avg_tick_duration_ns, p95_tick_duration_ns) = if durations.is_empty() {
            (0, 0)
        } else {
            let index = (durations.len() as f64 * 0.95) as usize;
            (
                durations.iter().sum::<u64>() / durations.len() as u64,
                durations[index.min(durations.len() - 1)],
            )
        };

        ClockMetrics {
            current_tick: self.current_tick.load(Ordering::Relaxed),
            slots_completed: self.slots_completed.load(Ordering::Relaxed),
            active_devices: self.active_devices.load(Ordering::Relaxed) as u32,
            tick_duration_ns: self.last_tick_duration.load(Ordering::Relaxed),
            avg_tick_duration_ns,
            max_tick_duration_ns: self.max_tick_duration.load(Ordering::Relaxed),
            p95_tick_duration_ns,
            last_rotation_ns: self.last_rotation.load(Ordering::Relaxed),
            total_ticks_processed: self.total_ticks.load(Ordering::Relaxed),
            system_uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.current_tick.store(0, Ordering::Relaxed);
        self.last_tick_duration.store(0, Ordering::Relaxed);
        self.max_tick_duration.store(0, Ordering::Relaxed);
        self.total_ticks.store(0, Ordering::Relaxed);
        self.slots_completed.store(0, Ordering::Relaxed);
        self.last_rotation.store(0, Ordering::Relaxed);

        for duration in self.tick_durations.iter() {
            duration.store(0, Ordering::Relaxed);
        }
    }
}
