//! Two-phase connection state of an externally controlled device
//!
//! Register and unregister requests only stage the desired state. The
//! effective `connected` flag is copied from the staged one at the slot
//! boundary, so a device's control regime never changes in the middle of a
//! slot.

use serde::{Deserialize, Serialize};

/// Observable phase of the connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionPhase {
    Disconnected,
    PendingConnect,
    Connected,
    PendingDisconnect,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    connected: bool,
    pending_connected: bool,
    last_dispatched_tick: u64,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective flag used by the simulation for the current slot
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Requested flag, effective from the next slot
    pub fn is_pending_connected(&self) -> bool {
        self.pending_connected
    }

    pub fn phase(&self) -> ConnectionPhase {
        match (self.connected, self.pending_connected) {
            (false, false) => ConnectionPhase::Disconnected,
            (false, true) => ConnectionPhase::PendingConnect,
            (true, true) => ConnectionPhase::Connected,
            (true, false) => ConnectionPhase::PendingDisconnect,
        }
    }

    pub fn request_connect(&mut self) {
        self.pending_connected = true;
    }

    /// Stage a disconnect. Fails when the device is not connected.
    pub fn request_disconnect(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        self.pending_connected = false;
        true
    }

    /// Slot boundary transition. Returns true when the effective flag changed.
    pub fn apply_slot_boundary(&mut self) -> bool {
        let changed = self.connected != self.pending_connected;
        self.connected = self.pending_connected;
        changed
    }

    pub fn last_dispatched_tick(&self) -> u64 {
        self.last_dispatched_tick
    }

    pub fn reset_tick_counter(&mut self) {
        self.last_dispatched_tick = 0;
    }

    /// Decide whether a tick notification is due and record it if so
    pub fn take_tick_dispatch(&mut self, tick_in_slot: u64, frequency: u64) -> bool {
        if tick_in_slot.saturating_sub(self.last_dispatched_tick) >= frequency {
            self.last_dispatched_tick = tick_in_slot;
            true
        } else {
            false
        }
    }
}
