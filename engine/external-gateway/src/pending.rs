//! Per-device buffer of admitted, not yet applied requests

use parking_lot::Mutex;

use crate::request::IncomingRequest;

/// Requests admitted from delivery threads, drained once per tick
///
/// Draining hands requests out last-admitted first. Clients have observed
/// this order, so it is kept as is.
#[derive(Debug, Default)]
pub struct PendingRequestQueue {
    requests: Mutex<Vec<IncomingRequest>>,
}

impl PendingRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, request: IncomingRequest) {
        self.requests.lock().push(request);
    }

    pub fn pop(&self) -> Option<IncomingRequest> {
        self.requests.lock().pop()
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }

    /// Take everything queued so far, in application order
    ///
    /// Requests admitted while the batch is being applied wait for the next
    /// tick.
    pub fn drain_lifo(&self) -> Vec<IncomingRequest> {
        let mut batch = std::mem::take(&mut *self.requests.lock());
        batch.reverse();
        batch
    }

    /// Discard every queued request without answering it
    pub fn reject_all(&self) -> usize {
        let mut requests = self.requests.lock();
        let dropped = requests.len();
        requests.clear();
        dropped
    }
}
