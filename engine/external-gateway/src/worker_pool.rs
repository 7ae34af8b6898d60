//! Bounded worker pool with a ledger of in-flight tasks
//!
//! Tasks are queued on a fixed-size rayon pool, so a burst of submissions
//! never spawns more threads than the configured capacity. Every task reports
//! its outcome on a one-slot completion channel kept in the ledger. `drain`
//! is the join barrier used before resubscribing: each pending handle is
//! awaited up to a timeout, and a handle that times out is cancelled and
//! abandoned.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{GatewayError, GatewayResult};

/// Cancellation flag handed to every task
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

#[derive(Debug)]
enum TaskOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

struct TaskHandle {
    id: u64,
    done: Receiver<TaskOutcome>,
    cancel: CancelToken,
}

/// Outcome counts of the tasks settled by one drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timed_out: usize,
}

impl DrainReport {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.cancelled + self.timed_out
    }

    fn record(&mut self, task_id: u64, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => self.completed += 1,
            TaskOutcome::Cancelled => self.cancelled += 1,
            TaskOutcome::Failed(reason) => {
                error!("Worker task {} failed: {}", task_id, reason);
                self.failed += 1;
            }
        }
    }
}

#[derive(Default)]
struct Ledger {
    handles: Vec<TaskHandle>,
    settled: DrainReport,
}

pub struct WorkerPool {
    name: String,
    capacity: usize,
    pool: ThreadPool,
    ledger: Mutex<Ledger>,
    next_task_id: AtomicU64,
}

impl WorkerPool {
    pub fn new(name: &str, capacity: usize) -> GatewayResult<Self> {
        let thread_prefix = name.to_string();
        let pool = ThreadPoolBuilder::new()
            .num_threads(capacity.max(1))
            .thread_name(move |i| format!("{}-worker-{}", thread_prefix, i))
            .build()
            .map_err(|e| GatewayError::WorkerPool(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            capacity: capacity.max(1),
            pool,
            ledger: Mutex::new(Ledger::default()),
            next_task_id: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue a task; never blocks the caller
    ///
    /// A task that returns an error or panics is reported as failed at the
    /// next drain.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce(&CancelToken) -> anyhow::Result<()> + Send + 'static,
    {
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = bounded(1);
        let cancel = CancelToken::default();
        let token = cancel.clone();

        self.pool.spawn(move || {
            let outcome = if token.is_cancelled() {
                TaskOutcome::Cancelled
            } else {
                match catch_unwind(AssertUnwindSafe(|| task(&token))) {
                    Ok(Ok(())) => TaskOutcome::Completed,
                    Ok(Err(e)) => TaskOutcome::Failed(format!("{:#}", e)),
                    Err(_) => TaskOutcome::Failed("task panicked".to_string()),
                }
            };
            // The ledger may already have abandoned this task
            let _ = sender.send(outcome);
        });

        let mut ledger = self.ledger.lock();
        Self::prune(&mut ledger);
        ledger.handles.push(TaskHandle { id, done: receiver, cancel });
    }

    /// Tasks submitted since the last drain that have not reported yet
    pub fn in_flight(&self) -> usize {
        let mut ledger = self.ledger.lock();
        Self::prune(&mut ledger);
        ledger.handles.len()
    }

    /// Await every tracked task, each for at most `timeout`, then clear the
    /// ledger. Failures and timeouts are logged, never returned.
    pub fn drain(&self, timeout: Duration) -> DrainReport {
        let Ledger { handles, mut settled } = std::mem::take(&mut *self.ledger.lock());

        for handle in handles {
            match handle.done.recv_timeout(timeout) {
                Ok(outcome) => settled.record(handle.id, outcome),
                Err(RecvTimeoutError::Timeout) => {
                    handle.cancel.cancel();
                    warn!(
                        "Worker task {} on pool {} timed out after {:?} during cleanup",
                        handle.id, self.name, timeout
                    );
                    settled.timed_out += 1;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    settled.record(handle.id, TaskOutcome::Failed("task dropped".to_string()));
                }
            }
        }

        debug!("Drained pool {}: {:?}", self.name, settled);
        settled
    }

    fn prune(ledger: &mut Ledger) {
        let mut pending = Vec::with_capacity(ledger.handles.len());
        for handle in ledger.handles.drain(..) {
            match handle.done.try_recv() {
                Ok(outcome) => ledger.settled.record(handle.id, outcome),
                Err(TryRecvError::Empty) => pending.push(handle),
                Err(TryRecvError::Disconnected) => ledger
                    .settled
                    .record(handle.id, TaskOutcome::Failed("task dropped".to_string())),
            }
        }
        ledger.handles = pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_burst_beyond_capacity_runs_every_task() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..25 {
            let counter = counter.clone();
            pool.submit(move |_| {
                thread::sleep(Duration::from_millis(2));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let report = pool.drain(Duration::from_secs(5));
        assert_eq!(report.completed, 25);
        assert_eq!(report.total(), 25);
        assert_eq!(counter.load(Ordering::SeqCst), 25);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_failures_and_panics_are_contained() {
        let pool = WorkerPool::new("test", 2).unwrap();
        pool.submit(|_| Ok(()));
        pool.submit(|_| Err(anyhow::anyhow!("listener failed")));
        pool.submit(|_| panic!("listener panicked"));

        let report = pool.drain(Duration::from_secs(5));
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 2);

        // Pool still usable afterwards
        pool.submit(|_| Ok(()));
        assert_eq!(pool.drain(Duration::from_secs(5)).completed, 1);
    }

    #[test]
    fn test_timed_out_task_is_cancelled() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let ran_second = Arc::new(AtomicBool::new(false));

        pool.submit(|_| {
            thread::sleep(Duration::from_millis(300));
            Ok(())
        });
        let flag = ran_second.clone();
        pool.submit(move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        let report = pool.drain(Duration::from_millis(20));
        assert_eq!(report.timed_out, 2);

        // The queued task sees its cancellation when it finally starts
        thread::sleep(Duration::from_millis(500));
        assert!(!ran_second.load(Ordering::SeqCst));
    }
}
