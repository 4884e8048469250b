//! Per-zone delivery worker lifecycle
//!
//! Each zone gets one long-lived tokio task, independent of all other
//! zones. A handle pairs the task with a `Notify` used to signal new
//! pending work and a `CancellationToken` that wakes any in-flight wait
//! when the zone is removed or the engine shuts down.

use crate::registry::ZoneId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Handle to one running zone worker.
///
/// The task itself is detached; it exits as soon as its token is
/// cancelled, since the run loop observes it at every suspension point.
struct WorkerHandle {
    notify: Arc<Notify>,
    cancel: CancellationToken,
}

/// The set of per-zone delivery workers, keyed by zone id
#[derive(Default)]
pub struct WorkerSet {
    workers: HashMap<ZoneId, WorkerHandle>,
}

impl WorkerSet {
    /// Create an empty worker set
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a worker for `zone_id`.
    ///
    /// `make_loop` receives the worker's wakeup handle and cancellation
    /// token and returns its run loop. A worker already registered for the
    /// zone is left untouched.
    pub fn spawn<F, Fut>(&mut self, zone_id: ZoneId, make_loop: F)
    where
        F: FnOnce(Arc<Notify>, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.workers.contains_key(&zone_id) {
            return;
        }

        let notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        tokio::spawn(make_loop(notify.clone(), cancel.clone()));

        self.workers.insert(zone_id, WorkerHandle { notify, cancel });
    }

    /// Stop the worker for `zone_id`, cancelling any in-flight wait.
    ///
    /// Returns whether a worker was registered. The run loop observes its
    /// token at every suspension point and exits on its own.
    pub fn stop(&mut self, zone_id: ZoneId) -> bool {
        match self.workers.remove(&zone_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Wake the worker for `zone_id`
    pub fn notify(&self, zone_id: ZoneId) {
        if let Some(handle) = self.workers.get(&zone_id) {
            handle.notify.notify_one();
        }
    }

    /// Wake every worker (new pending work exists)
    pub fn notify_all(&self) {
        for handle in self.workers.values() {
            handle.notify.notify_one();
        }
    }

    /// Stop every worker
    pub fn stop_all(&mut self) {
        for (_, handle) in self.workers.drain() {
            handle.cancel.cancel();
        }
    }

    /// Number of running workers
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether no workers are running
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Whether a worker is registered for `zone_id`
    pub fn contains(&self, zone_id: ZoneId) -> bool {
        self.workers.contains_key(&zone_id)
    }
}
