//! Federation replication engine
//!
//! [`FederationManager`] is the state machine at the heart of the engine.
//! On the master it assigns indices to new commands, appends them to the
//! durable log and drives one delivery worker per zone; on a follower the
//! same type validates and applies inbound records in index order and
//! reports gaps so the master can rewind.
//!
//! All reads and writes of `last_index` and the zone map go through one
//! exclusion lock. RPC calls and log I/O always happen outside it, so a
//! slow or unreachable zone never blocks unrelated zones or new
//! `replicate` calls.

use crate::config::FederationConfig;
use crate::registry::{membership_plan, FederationState, ZoneDescriptor, ZoneId, ZoneState};
use crate::rpc::client::{DeliveryClient, DeliveryOutcome};
use crate::rpc::server::RecordSink;
use crate::rpc::transport::RecordTransport;
use crate::store::LogStore;
use crate::worker::WorkerSet;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Callback executing a replicated command against the underlying store
pub type ApplyCallback = Arc<dyn Fn(u64, &str) -> Result<()> + Send + Sync>;

/// Engine counters
#[derive(Debug, Clone, Default)]
pub struct FederationStats {
    /// Commands committed to the log by this node as master
    pub records_replicated: u64,
    /// Inbound records applied in order
    pub records_applied: u64,
    /// Inbound retransmissions ignored
    pub duplicates_ignored: u64,
    /// Inbound records refused because of a sequence gap
    pub gaps_detected: u64,
    /// Deliveries confirmed by zones
    pub deliveries_confirmed: u64,
    /// Cursor rewinds triggered by zone rejections
    pub rewinds: u64,
    /// Delivery attempts that failed at the network layer
    pub network_errors: u64,
    /// Log records removed by purge
    pub records_purged: u64,
}

/// Federation replication engine
pub struct FederationManager {
    /// Configuration
    config: FederationConfig,
    /// Durable record log
    store: LogStore,
    /// last_index + zone cursors, behind the single exclusion lock
    state: Mutex<FederationState>,
    /// Outbound RPC adapter
    client: DeliveryClient,
    /// Per-zone delivery workers
    workers: Mutex<WorkerSet>,
    /// Command executor for inbound records (follower side)
    apply_callback: Mutex<Option<ApplyCallback>>,
    /// Serializes the follower apply path
    apply_lock: Mutex<()>,
    /// Statistics
    stats: Mutex<FederationStats>,
    /// Shutdown signal for the control task
    shutdown: CancellationToken,
    /// Running flag
    running: AtomicBool,
    /// Handle back to the owning `Arc`, used to hand workers a clone
    self_ref: Weak<FederationManager>,
}

impl FederationManager {
    /// Create an engine over an opened log store and transport.
    ///
    /// Recovers `last_index` from the store, so `replicate` and
    /// `apply_record` are usable before `start`.
    pub fn new(
        config: FederationConfig,
        store: LogStore,
        transport: Arc<dyn RecordTransport>,
    ) -> Result<Arc<Self>> {
        config.validate().map_err(Error::config)?;

        let last_index = store.last_index()?;
        let client = DeliveryClient::new(transport, config.rpc_timeout);

        Ok(Arc::new_cyclic(|self_ref| Self {
            config,
            store,
            state: Mutex::new(FederationState {
                last_index,
                purged_through: 0,
                zones: Default::default(),
            }),
            client,
            workers: Mutex::new(WorkerSet::new()),
            apply_callback: Mutex::new(None),
            apply_lock: Mutex::new(()),
            stats: Mutex::new(FederationStats::default()),
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        }))
    }

    /// Install the executor for inbound commands (follower side)
    pub fn set_apply_callback(&self, callback: ApplyCallback) {
        *self.apply_callback.lock() = Some(callback);
    }

    // ------------------------------------------------------------------
    // Master-side submission
    // ------------------------------------------------------------------

    /// Commit a command to the federation log and signal every zone
    /// worker. Returns the assigned index. [MASTER]
    pub fn replicate(&self, command: &str) -> Result<u64> {
        let index = self.store.append(command)?;

        {
            let mut state = self.state.lock();
            // Appends commit in store order; a racing earlier append must
            // not move last_index backwards.
            state.last_index = state.last_index.max(index);
        }

        self.stats.lock().records_replicated += 1;
        tracing::debug!("Replicated record {}", index);

        self.workers.lock().notify_all();

        Ok(index)
    }

    // ------------------------------------------------------------------
    // Follower-side application
    // ------------------------------------------------------------------

    /// Validate and apply one inbound record. [FOLLOWER]
    ///
    /// In-order records are executed, then persisted to the log, then
    /// `last_index` advances; a failed execution leaves log and state
    /// untouched. Duplicates are idempotent no-ops and gaps are refused;
    /// both return the current `last_index` so the sender can rewind.
    pub fn apply_record(&self, index: u64, command: &str) -> Result<u64> {
        let _guard = self.apply_lock.lock();

        let expected = self.state.lock().last_index + 1;

        if index < expected {
            tracing::debug!(
                "Record {} already applied (last index {})",
                index,
                expected - 1
            );
            self.stats.lock().duplicates_ignored += 1;
            return Ok(expected - 1);
        }

        if index > expected {
            tracing::warn!(
                "Record gap: received {}, expected {}; reporting last index {}",
                index,
                expected,
                expected - 1
            );
            self.stats.lock().gaps_detected += 1;
            return Ok(expected - 1);
        }

        let callback = self.apply_callback.lock().clone();
        if let Some(callback) = &callback {
            callback(index, command)?;
        }

        let assigned = self.store.append(command)?;
        if assigned != index {
            return Err(Error::internal(format!(
                "log assigned index {} to inbound record {}",
                assigned, index
            )));
        }

        self.state.lock().last_index = index;
        self.stats.lock().records_applied += 1;
        tracing::debug!("Applied record {}", index);

        Ok(index)
    }

    // ------------------------------------------------------------------
    // Delivery state machine
    // ------------------------------------------------------------------

    /// A zone confirmed the record at its cursor: advance the cursor.
    ///
    /// Also reachable out-of-band when the confirmation arrives via a side
    /// channel instead of the delivery loop's own RPC return.
    pub fn on_delivery_success(&self, zone_id: ZoneId) {
        {
            let mut state = self.state.lock();
            let last_index = state.last_index;

            let Some(zone) = state.zones.get_mut(&zone_id) else {
                tracing::warn!("Delivery success for unknown zone {}", zone_id);
                return;
            };

            // next never exceeds last_index + 1
            if zone.next <= last_index {
                zone.next += 1;
                tracing::debug!("Zone {} advanced to {}", zone_id, zone.next);
            }
        }

        self.stats.lock().deliveries_confirmed += 1;
        self.workers.lock().notify(zone_id);
    }

    /// A zone reported it cannot take the sent index: rewind the cursor to
    /// the zone's authoritative position. Lower-only; a remote claiming to
    /// be ahead never advances the cursor.
    pub fn on_delivery_failure(&self, zone_id: ZoneId, zone_last: u64) {
        {
            let mut state = self.state.lock();
            let purged_through = state.purged_through;

            let Some(zone) = state.zones.get_mut(&zone_id) else {
                tracing::warn!("Delivery failure for unknown zone {}", zone_id);
                return;
            };

            let mut rewound = zone.next.min(zone_last + 1);
            if rewound <= purged_through {
                tracing::warn!(
                    "Zone {} last applied {} is below the purge floor {}; resuming from the first retained record",
                    zone_id,
                    zone_last,
                    purged_through
                );
                rewound = purged_through + 1;
            }
            if rewound != zone.next {
                tracing::info!(
                    "Zone {} diverged: rewinding cursor {} -> {}",
                    zone_id,
                    zone.next,
                    rewound
                );
                zone.next = rewound;
            }
        }

        self.stats.lock().rewinds += 1;
        self.workers.lock().notify(zone_id);
    }

    /// Snapshot the next record owed to `zone_id`, or `None` when the zone
    /// is caught up or unknown. The log read happens outside the lock.
    fn next_pending(&self, zone_id: ZoneId) -> Result<Option<(u64, String, BTreeMap<u32, String>)>> {
        let (next, endpoints) = {
            let state = self.state.lock();

            let Some(zone) = state.zones.get(&zone_id) else {
                return Ok(None);
            };

            if zone.next > state.last_index {
                return Ok(None);
            }

            (zone.next, zone.endpoints.clone())
        };

        match self.store.get(next) {
            Ok(command) => Ok(Some((next, command, endpoints))),
            Err(Error::NotFound(_)) => {
                // The cursor moved under us (rewind/removal race); the next
                // iteration re-reads it. Purge never deletes at or above
                // any zone's cursor.
                tracing::warn!("Record {} owed to zone {} is not in the log", next, zone_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Per-zone delivery run loop
    async fn zone_delivery_loop(
        self: Arc<Self>,
        zone_id: ZoneId,
        notify: Arc<Notify>,
        cancel: CancellationToken,
    ) {
        tracing::debug!("Delivery worker for zone {} started", zone_id);

        let mut backoff = self.config.retry_interval;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let pending = match self.next_pending(zone_id) {
                Ok(pending) => pending,
                Err(e) => {
                    tracing::warn!("Zone {} pending lookup failed: {}", zone_id, e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = std::cmp::min(backoff * 2, self.config.max_retry_interval);
                    continue;
                }
            };

            let Some((index, command, endpoints)) = pending else {
                // Caught up: idle until signaled or the recheck tick.
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = notify.notified() => {}
                    _ = tokio::time::sleep(self.config.idle_recheck_interval) => {}
                }
                continue;
            };

            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.client.deliver(zone_id, &endpoints, index, &command) => outcome,
            };

            match outcome {
                DeliveryOutcome::Applied => {
                    self.on_delivery_success(zone_id);
                    backoff = self.config.retry_interval;
                    // Loop immediately: pipeline any further pending records.
                }
                DeliveryOutcome::Rejected { zone_last } => {
                    self.on_delivery_failure(zone_id, zone_last);
                    backoff = self.config.retry_interval;
                }
                DeliveryOutcome::Network(detail) => {
                    tracing::debug!(
                        "Zone {} unreachable at record {}: {}",
                        zone_id,
                        index,
                        detail
                    );
                    self.stats.lock().network_errors += 1;

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = std::cmp::min(backoff * 2, self.config.max_retry_interval);
                }
            }
        }

        tracing::debug!("Delivery worker for zone {} stopped", zone_id);
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Recompute the full zone set from the membership source.
    ///
    /// New zones start delivering from `last_index + 1`; removed zones get
    /// their worker stopped and state dropped; surviving zones keep their
    /// cursor and pick up refreshed endpoint lists.
    pub fn update_zones(&self, descriptors: &[ZoneDescriptor]) {
        let plan = {
            let mut state = self.state.lock();
            let plan = membership_plan(&state.zones, descriptors);

            for zone_id in &plan.stop {
                state.zones.remove(zone_id);
            }

            let next = state.last_index + 1;
            for zone_id in &plan.start {
                if let Some(descriptor) = descriptors.iter().find(|d| d.zone_id == *zone_id) {
                    state
                        .zones
                        .insert(*zone_id, ZoneState::new(descriptor.clone(), next));
                }
            }

            for descriptor in descriptors {
                if let Some(zone) = state.zones.get_mut(&descriptor.zone_id) {
                    zone.endpoints = descriptor.endpoints.clone();
                }
            }

            plan
        };

        let mut workers = self.workers.lock();

        for zone_id in &plan.stop {
            workers.stop(*zone_id);
            tracing::info!("Zone {} left the federation", zone_id);
        }

        for zone_id in &plan.start {
            self.spawn_worker(&mut workers, *zone_id);
            tracing::info!("Zone {} joined the federation", zone_id);
        }
    }

    /// Register a delivery worker for `zone_id` in `workers`.
    ///
    /// The run loop holds a strong handle to the engine; `self_ref` always
    /// upgrades here because the caller reached us through that `Arc`.
    fn spawn_worker(&self, workers: &mut WorkerSet, zone_id: ZoneId) {
        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };

        workers.spawn(zone_id, move |notify, cancel| {
            manager.zone_delivery_loop(zone_id, notify, cancel)
        });
    }

    /// Add one zone and start its delivery worker.
    ///
    /// A zone already present only gets its endpoint list refreshed.
    pub fn add_zone(&self, descriptor: ZoneDescriptor) {
        let zone_id = descriptor.zone_id;

        {
            let mut state = self.state.lock();
            let next = state.last_index + 1;

            if let Some(zone) = state.zones.get_mut(&zone_id) {
                zone.endpoints = descriptor.endpoints;
                return;
            }

            state
                .zones
                .insert(zone_id, ZoneState::new(descriptor, next));
        }

        self.spawn_worker(&mut self.workers.lock(), zone_id);

        tracing::info!("Zone {} added to the federation", zone_id);
    }

    /// Remove one zone and stop its delivery worker. Records it has not
    /// received stay in the log; a re-added zone starts from the log head
    /// at that time (or rewinds on its first rejection).
    pub fn delete_zone(&self, zone_id: ZoneId) {
        self.state.lock().zones.remove(&zone_id);

        if self.workers.lock().stop(zone_id) {
            tracing::info!("Zone {} removed from the federation", zone_id);
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle & housekeeping
    // ------------------------------------------------------------------

    /// Start the engine as master: recover `last_index`, install the zone
    /// set with one worker per zone, and launch the housekeeping task.
    pub fn start(&self, descriptors: &[ZoneDescriptor]) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::internal("federation manager already started"));
        }

        let recovered = self.store.last_index()?;
        self.state.lock().last_index = recovered;
        tracing::info!("Federation log recovered at index {}", recovered);

        self.update_zones(descriptors);

        let Some(manager) = self.self_ref.upgrade() else {
            return Err(Error::internal("federation manager dropped during start"));
        };
        let cancel = self.shutdown.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(manager.config.timer_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval fires immediately once; skip that tick
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {
                        if let Err(e) = manager.on_timer() {
                            tracing::warn!("Log purge failed: {}", e);
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Periodic housekeeping: purge old log records.
    ///
    /// The floor keeps the `log_retention` most recent records and never
    /// crosses any zone's cursor; deleting a record a lagging zone still
    /// needs would make that zone unrecoverable. Returns the number of
    /// records removed.
    pub fn on_timer(&self) -> Result<usize> {
        let floor = {
            let mut state = self.state.lock();

            let mut floor = state.last_index.saturating_sub(self.config.log_retention);
            if let Some(min_next) = state.zones.values().map(|z| z.next).min() {
                floor = floor.min(min_next.saturating_sub(1));
            }

            // Committed before the lock drops: a rewind landing between
            // here and the store delete clamps to floor + 1 instead of
            // pointing at records about to disappear.
            state.purged_through = state.purged_through.max(floor);
            floor
        };

        if floor == 0 {
            return Ok(0);
        }

        let purged = self.store.purge_through(floor)?;
        if purged > 0 {
            self.stats.lock().records_purged += purged as u64;
            tracing::debug!("Purged {} log records through index {}", purged, floor);
        }

        Ok(purged)
    }

    /// Shut the engine down: stop the housekeeping task and every zone
    /// worker. Idempotent, and safe even if startup partially failed.
    pub fn finalize(&self) {
        self.shutdown.cancel();
        self.workers.lock().stop_all();

        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Federation manager stopped");
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Index of the most recently committed record
    pub fn last_index(&self) -> u64 {
        self.state.lock().last_index
    }

    /// Delivery cursor of one zone
    pub fn zone_cursor(&self, zone_id: ZoneId) -> Option<u64> {
        self.state.lock().zones.get(&zone_id).map(|z| z.next)
    }

    /// Number of registered zones
    pub fn zone_count(&self) -> usize {
        self.state.lock().zones.len()
    }

    /// Number of running delivery workers
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Whether the engine was started and not finalized
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Engine counters
    pub fn stats(&self) -> FederationStats {
        self.stats.lock().clone()
    }
}

impl RecordSink for FederationManager {
    fn apply_record(&self, index: u64, command: &str) -> Result<u64> {
        FederationManager::apply_record(self, index, command)
    }
}
