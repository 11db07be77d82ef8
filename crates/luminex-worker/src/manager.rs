//! The worker lifecycle manager.
//!
//! ## State machine
//!
//! ```text
//! Absent ──get_worker──▶ Pending ──created──▶ Live
//!    ▲                      │                   │
//!    └──── create failed ───┘                   │
//!    └──── idle / update_create_data / dispose ─┘
//! ```
//!
//! Concurrent `get_worker` calls that find the slot `Pending` wait on the
//! same creation instead of starting another one. Idle stops,
//! `update_create_data` and `dispose` only ever act on a `Live` unit; a
//! creation still in flight becomes the live unit when it resolves, unless
//! the manager was disposed in the meantime, in which case the new unit is
//! destroyed immediately and its waiters get [`WorkerError::Disposed`].
//!
//! A unit can also be stopped while a `get_worker` call is waiting on its
//! resource sync. The call re-checks the slot once the sync returns: it
//! fails with [`WorkerError::Disposed`] after a dispose, and otherwise
//! starts over on a fresh unit, so a proxy to a destroyed unit is never
//! handed out.
//!
//! ## Learning: Short Critical Sections
//!
//! All state sits behind one `std::sync::Mutex`. It is never held across
//! an `.await`: each operation decides what to do under the lock, releases
//! it, and only then talks to the host.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use luminex_core::config::{DEFAULT_INTERVAL_MS, DEFAULT_STOP_WHEN_IDLE_MS};
use luminex_core::{DocumentId, EventBus, StopReason, WorkerEvent, WorkerSettings};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::host::{ExecutionHost, HostError, UnitConfig};
use crate::{WorkerError, WorkerResult};

/// Options for [`WorkerManager::new`].
#[derive(Debug, Clone)]
pub struct WorkerManagerOptions<C> {
    /// Data sent to the unit when it is created
    pub create_data: Option<C>,

    /// How often to check whether the unit is idle
    pub interval: Duration,

    /// Identifies the worker in logs and events
    pub label: String,

    /// Which worker implementation the host should load
    pub module_id: String,

    /// Stop the unit after it has been unused for this long; `None` never stops it
    pub stop_when_idle_for: Option<Duration>,
}

impl<C> WorkerManagerOptions<C> {
    /// Options with the default interval (30s) and idle threshold (2min).
    pub fn new(label: impl Into<String>, module_id: impl Into<String>) -> Self {
        Self {
            create_data: None,
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            label: label.into(),
            module_id: module_id.into(),
            stop_when_idle_for: Some(Duration::from_millis(DEFAULT_STOP_WHEN_IDLE_MS)),
        }
    }

    /// Options taken from configured [`WorkerSettings`].
    pub fn from_settings(
        label: impl Into<String>,
        module_id: impl Into<String>,
        settings: &WorkerSettings,
    ) -> Self {
        Self::new(label, module_id)
            .with_interval(settings.interval())
            .with_stop_when_idle_for(settings.stop_when_idle.as_duration())
    }

    pub fn with_create_data(mut self, create_data: C) -> Self {
        self.create_data = Some(create_data);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_stop_when_idle_for(mut self, limit: Option<Duration>) -> Self {
        self.stop_when_idle_for = limit;
        self
    }
}

/// A created unit together with its proxy. They are only ever stored,
/// handed out and dropped as a pair.
struct LiveUnit<H: ExecutionHost> {
    generation: u64,
    unit: H::Unit,
    proxy: H::Proxy,
}

/// Outcome of a creation; `None` until it resolves.
type Creation<H> = Option<WorkerResult<Arc<LiveUnit<H>>>>;

enum UnitSlot<H: ExecutionHost> {
    Absent,
    Pending {
        generation: u64,
        outcome: watch::Receiver<Creation<H>>,
    },
    Live(Arc<LiveUnit<H>>),
}

struct State<H: ExecutionHost> {
    create_data: Option<H::CreateData>,
    slot: UnitSlot<H>,
    last_used: Instant,
    disposed: bool,
    generations: u64,
}

impl<H: ExecutionHost> State<H> {
    /// Removes and returns the live unit, leaving a pending creation alone.
    fn take_live(&mut self) -> Option<Arc<LiveUnit<H>>> {
        match std::mem::replace(&mut self.slot, UnitSlot::Absent) {
            UnitSlot::Live(live) => Some(live),
            other => {
                self.slot = other;
                None
            }
        }
    }

    fn is_pending(&self, generation: u64) -> bool {
        matches!(self.slot, UnitSlot::Pending { generation: g, .. } if g == generation)
    }
}

/// Where a finished creation ended up.
enum Installed {
    Live,
    Disposed,
    Superseded,
}

enum Acquired<H: ExecutionHost> {
    Live(Arc<LiveUnit<H>>),
    Pending {
        generation: u64,
        outcome: watch::Receiver<Creation<H>>,
    },
}

struct Inner<H: ExecutionHost> {
    host: H,
    runtime: Handle,
    label: String,
    module_id: String,
    stop_when_idle_for: Option<Duration>,
    events: EventBus,
    state: Mutex<State<H>>,
}

/// Owns at most one background unit and manages its lifetime.
///
/// The unit is created on the first [`get_worker`](Self::get_worker) call,
/// stopped once it has been idle for `stop_when_idle_for`, and recreated on
/// demand. Dropping the manager disposes it.
pub struct WorkerManager<H: ExecutionHost> {
    inner: Arc<Inner<H>>,
    idle_check: JoinHandle<()>,
}

impl<H: ExecutionHost> WorkerManager<H> {
    /// Creates a manager and starts its idle check.
    ///
    /// No unit is created until the first [`get_worker`](Self::get_worker)
    /// call. Must be called from within a tokio runtime.
    pub fn new(host: H, options: WorkerManagerOptions<H::CreateData>) -> WorkerResult<Self> {
        if options.interval.is_zero() {
            return Err(WorkerError::InvalidInterval);
        }
        let runtime = Handle::try_current().map_err(|e| WorkerError::Runtime(e.to_string()))?;

        let inner = Arc::new(Inner {
            host,
            runtime: runtime.clone(),
            label: options.label,
            module_id: options.module_id,
            stop_when_idle_for: options.stop_when_idle_for,
            events: EventBus::new(),
            state: Mutex::new(State {
                create_data: options.create_data,
                slot: UnitSlot::Absent,
                last_used: Instant::now(),
                disposed: false,
                generations: 0,
            }),
        });

        let idle_check = runtime.spawn(idle_loop(Arc::downgrade(&inner), options.interval));

        tracing::debug!(
            label = %inner.label,
            interval = ?options.interval,
            stop_when_idle_for = ?inner.stop_when_idle_for,
            "worker manager started"
        );

        Ok(Self { inner, idle_check })
    }

    /// Returns a proxy to the unit, synchronized with `resources`.
    ///
    /// Creates the unit first if none is running. The proxy is only returned
    /// once the host has synchronized exactly `resources`, in order.
    pub async fn get_worker(&self, resources: &[DocumentId]) -> WorkerResult<H::Proxy> {
        loop {
            let live = match self.inner.acquire()? {
                Acquired::Live(live) => live,
                Acquired::Pending {
                    generation,
                    outcome,
                } => self.inner.wait_for_creation(generation, outcome).await?,
            };

            let synced = self.inner.host.sync_resources(&live.unit, resources).await;

            // The unit may have been stopped while the sync was in flight
            if !self.inner.is_current(&live)? {
                tracing::debug!(
                    label = %self.inner.label,
                    generation = live.generation,
                    "worker stopped during resource sync, retrying"
                );
                continue;
            }

            if let Err(e) = synced {
                tracing::warn!(
                    label = %self.inner.label,
                    generation = live.generation,
                    "resource sync failed: {}",
                    e
                );
                return Err(WorkerError::SyncFailed(e));
            }

            tracing::trace!(
                label = %self.inner.label,
                generation = live.generation,
                resources = resources.len(),
                "resources synced"
            );
            self.inner.events.emit(WorkerEvent::Synced {
                label: self.inner.label.clone(),
                generation: live.generation,
                resources: resources.to_vec(),
            });

            return Ok(live.proxy.clone());
        }
    }

    /// Replaces the creation data and stops the running unit, if any.
    ///
    /// The next [`get_worker`](Self::get_worker) call starts a fresh unit
    /// with the new data.
    pub fn update_create_data(&self, create_data: H::CreateData) {
        let stale = {
            let mut state = self.inner.lock();
            state.create_data = Some(create_data);
            state.take_live()
        };
        if let Some(live) = stale {
            self.inner.stop(&live, StopReason::Reconfigured);
        }
    }

    /// Stops the idle check and the running unit. Further
    /// [`get_worker`](Self::get_worker) calls fail with
    /// [`WorkerError::Disposed`]. Calling this again is a no-op.
    pub fn dispose(&self) {
        let live = {
            let mut state = self.inner.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.take_live()
        };

        self.idle_check.abort();
        if let Some(live) = live {
            self.inner.stop(&live, StopReason::Disposed);
        }

        tracing::debug!(label = %self.inner.label, "worker manager disposed");
        self.inner.events.emit(WorkerEvent::Disposed {
            label: self.inner.label.clone(),
        });
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.inner.events.subscribe()
    }

    /// Returns true while a created unit is live.
    pub fn is_running(&self) -> bool {
        matches!(self.inner.lock().slot, UnitSlot::Live(_))
    }

    /// Returns true once [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    /// Returns the worker label.
    pub fn label(&self) -> &str {
        &self.inner.label
    }
}

impl<H: ExecutionHost> Drop for WorkerManager<H> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<H: ExecutionHost> Inner<H> {
    fn lock(&self) -> MutexGuard<'_, State<H>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Marks the manager as used and returns the live unit, joining or
    /// starting a creation when there is none.
    fn acquire(self: &Arc<Self>) -> WorkerResult<Acquired<H>> {
        let mut state = self.lock();
        if state.disposed {
            return Err(WorkerError::Disposed);
        }

        let now = Instant::now();
        if now > state.last_used {
            state.last_used = now;
        }

        match &state.slot {
            UnitSlot::Live(live) => return Ok(Acquired::Live(Arc::clone(live))),
            UnitSlot::Pending {
                generation,
                outcome,
            } => {
                return Ok(Acquired::Pending {
                    generation: *generation,
                    outcome: outcome.clone(),
                });
            }
            UnitSlot::Absent => {}
        }

        state.generations += 1;
        let generation = state.generations;
        let config = UnitConfig {
            label: self.label.clone(),
            module_id: self.module_id.clone(),
            create_data: state.create_data.clone(),
        };
        let (tx, outcome) = watch::channel(None);
        state.slot = UnitSlot::Pending {
            generation,
            outcome: outcome.clone(),
        };
        drop(state);

        // Spawned so that a caller giving up does not strand the other waiters
        self.runtime.spawn(Arc::clone(self).create(generation, config, tx));

        Ok(Acquired::Pending {
            generation,
            outcome,
        })
    }

    async fn create(
        self: Arc<Self>,
        generation: u64,
        config: UnitConfig<H::CreateData>,
        tx: watch::Sender<Creation<H>>,
    ) {
        tracing::debug!(label = %self.label, generation, module = %self.module_id, "creating worker");
        let created = self.host.create_unit(&config).await;
        let outcome = self.finish_creation(generation, created);
        tx.send_replace(Some(outcome));
    }

    fn finish_creation(
        &self,
        generation: u64,
        created: Result<H::Unit, HostError>,
    ) -> WorkerResult<Arc<LiveUnit<H>>> {
        let unit = match created {
            Ok(unit) => unit,
            Err(e) => {
                self.reset_pending(generation);
                tracing::warn!(label = %self.label, generation, "worker creation failed: {}", e);
                self.events.emit(WorkerEvent::CreateFailed {
                    label: self.label.clone(),
                    message: e.to_string(),
                });
                return Err(WorkerError::CreateFailed {
                    label: self.label.clone(),
                    source: e,
                });
            }
        };

        let live = Arc::new(LiveUnit {
            generation,
            proxy: self.host.proxy(&unit),
            unit,
        });

        let outcome = {
            let mut state = self.lock();
            let pending = state.is_pending(generation);
            if state.disposed {
                if pending {
                    state.slot = UnitSlot::Absent;
                }
                Installed::Disposed
            } else if pending {
                state.slot = UnitSlot::Live(Arc::clone(&live));
                Installed::Live
            } else {
                Installed::Superseded
            }
        };

        match outcome {
            Installed::Live => {}
            Installed::Disposed => {
                tracing::debug!(label = %self.label, generation, "manager disposed during creation");
                self.stop(&live, StopReason::Disposed);
                return Err(WorkerError::Disposed);
            }
            Installed::Superseded => {
                // The slot no longer waits on this creation, so nothing will use the unit
                tracing::debug!(label = %self.label, generation, "discarding superseded worker");
                self.host.destroy_unit(&live.unit);
                return Err(WorkerError::CreationAborted);
            }
        }

        tracing::debug!(label = %self.label, generation, "worker created");
        self.events.emit(WorkerEvent::Created {
            label: self.label.clone(),
            generation,
        });
        Ok(live)
    }

    async fn wait_for_creation(
        &self,
        generation: u64,
        mut outcome: watch::Receiver<Creation<H>>,
    ) -> WorkerResult<Arc<LiveUnit<H>>> {
        let resolved = match outcome.wait_for(Option::is_some).await {
            Ok(resolved) => (*resolved).clone(),
            Err(_) => None,
        };

        resolved.unwrap_or_else(|| {
            // The creation task went away without reporting back
            tracing::warn!(label = %self.label, generation, "worker creation aborted");
            self.reset_pending(generation);
            Err(WorkerError::CreationAborted)
        })
    }

    /// Whether `live` is still the manager's unit; fails once disposed.
    fn is_current(&self, live: &LiveUnit<H>) -> WorkerResult<bool> {
        let state = self.lock();
        if state.disposed {
            return Err(WorkerError::Disposed);
        }
        Ok(matches!(&state.slot, UnitSlot::Live(current) if current.generation == live.generation))
    }

    fn reset_pending(&self, generation: u64) {
        let mut state = self.lock();
        if state.is_pending(generation) {
            state.slot = UnitSlot::Absent;
        }
    }

    fn check_idle(&self) {
        let Some(limit) = self.stop_when_idle_for else {
            return;
        };

        let idle = {
            let mut state = self.lock();
            if !matches!(state.slot, UnitSlot::Live(_)) || state.last_used.elapsed() <= limit {
                return;
            }
            state.take_live()
        };

        if let Some(live) = idle {
            self.stop(&live, StopReason::Idle);
        }
    }

    fn stop(&self, live: &LiveUnit<H>, reason: StopReason) {
        tracing::debug!(
            label = %self.label,
            generation = live.generation,
            %reason,
            "stopping worker"
        );
        self.host.destroy_unit(&live.unit);
        self.events.emit(WorkerEvent::Stopped {
            label: self.label.clone(),
            generation: live.generation,
            reason,
        });
    }
}

async fn idle_loop<H: ExecutionHost>(manager: Weak<Inner<H>>, period: Duration) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match manager.upgrade() {
            Some(inner) => inner.check_idle(),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeHost, FakeProxy, FakeUnit, HostCall};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn manager(
        host: &FakeHost<u32>,
        interval: u64,
        stop_when_idle_for: Option<u64>,
    ) -> WorkerManager<FakeHost<u32>> {
        let options = WorkerManagerOptions::new("analysis", "stats")
            .with_create_data(1)
            .with_interval(ms(interval))
            .with_stop_when_idle_for(stop_when_idle_for.map(ms));
        WorkerManager::new(host.clone(), options).unwrap()
    }

    /// Lets spawned tasks run without advancing the paused clock.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_creation() {
        let host = FakeHost::new();
        let manager = manager(&host, 10, Some(50));

        time::sleep(ms(1_000)).await;
        assert!(host.calls().is_empty());
        assert!(!manager.is_running());

        manager.get_worker(&[]).await.unwrap();
        assert_eq!(host.create_count(), 1);
        assert!(manager.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_creation() {
        let host = FakeHost::new();
        let manager = Arc::new(manager(&host, 10, Some(50)));
        host.hold_creations();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_worker(&[]).await })
            })
            .collect();

        settle().await;
        assert_eq!(host.create_count(), 1);
        assert!(handles.iter().all(|h| !h.is_finished()));

        host.release_creations();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), FakeProxy(1));
        }

        assert_eq!(host.create_count(), 1);
        assert_eq!(host.sync_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_teardown() {
        let host = FakeHost::new();
        let manager = manager(&host, 10, Some(50));
        let start = Instant::now();

        assert_eq!(manager.get_worker(&[]).await.unwrap(), FakeProxy(1));

        time::sleep_until(start + ms(55)).await;
        assert!(manager.is_running());

        // The check at t=60 sees 60ms of idleness
        time::sleep_until(start + ms(65)).await;
        assert!(!manager.is_running());
        assert!(host.is_destroyed(1));

        assert_eq!(manager.get_worker(&[]).await.unwrap(), FakeProxy(2));
        assert_eq!(host.create_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_premature_teardown() {
        let host = FakeHost::new();
        let manager = manager(&host, 10, Some(50));
        let start = Instant::now();

        for step in 0..6 {
            time::sleep_until(start + ms(step * 35 + 3)).await;
            assert_eq!(manager.get_worker(&[]).await.unwrap(), FakeProxy(1));
        }

        assert_eq!(host.create_count(), 1);
        assert_eq!(host.destroy_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_stops_without_idle_limit() {
        let host = FakeHost::new();
        let manager = manager(&host, 10, None);

        manager.get_worker(&[]).await.unwrap();
        time::sleep(Duration::from_secs(3_600)).await;

        assert!(manager.is_running());
        assert_eq!(host.destroy_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_create_data_recreates_with_new_data() {
        let host = FakeHost::new();
        let manager = manager(&host, 10, Some(50));

        manager.get_worker(&[]).await.unwrap();
        manager.update_create_data(2);

        assert!(!manager.is_running());
        assert!(host.is_destroyed(1));
        assert_eq!(host.create_count(), 1);

        assert_eq!(manager.get_worker(&[]).await.unwrap(), FakeProxy(2));
        let creates: Vec<_> = host
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::Create { create_data, .. } => Some(create_data),
                _ => None,
            })
            .collect();
        assert_eq!(creates, vec![Some(1), Some(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_create_data_without_unit() {
        let host = FakeHost::new();
        let manager = manager(&host, 10, Some(50));

        manager.update_create_data(5);
        assert!(host.calls().is_empty());

        manager.dispose();
        manager.update_create_data(6);
        assert_eq!(host.destroy_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_is_terminal_and_idempotent() {
        let host = FakeHost::new();
        let manager = manager(&host, 10, Some(50));

        manager.get_worker(&[]).await.unwrap();
        manager.dispose();
        manager.dispose();

        assert!(manager.is_disposed());
        assert!(!manager.is_running());
        assert!(matches!(
            manager.get_worker(&[]).await,
            Err(WorkerError::Disposed)
        ));
        assert_eq!(host.destroy_count(), 1);
        assert_eq!(host.create_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_without_unit() {
        let host = FakeHost::new();
        let manager = manager(&host, 10, Some(50));

        manager.dispose();
        time::sleep(ms(100)).await;

        assert!(host.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_disposes() {
        let host = FakeHost::new();
        let manager = manager(&host, 10, Some(50));

        manager.get_worker(&[]).await.unwrap();
        drop(manager);

        assert!(host.is_destroyed(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_completes_before_hand_back() {
        let host = FakeHost::new();
        let manager = Arc::new(manager(&host, 10, Some(50)));
        let (r1, r2) = (DocumentId::new(), DocumentId::new());
        host.hold_syncs();

        let handle = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_worker(&[r1, r2]).await })
        };

        settle().await;
        assert!(!handle.is_finished());
        assert_eq!(
            host.calls().last(),
            Some(&HostCall::Sync {
                unit: 1,
                resources: vec![r1, r2],
            })
        );

        host.release_syncs();
        assert_eq!(handle.await.unwrap().unwrap(), FakeProxy(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failure_leaves_no_unit() {
        let host = FakeHost::new();
        let manager = manager(&host, 10, Some(50));
        host.fail_next_create("no memory");

        let err = manager.get_worker(&[]).await.unwrap_err();
        assert!(matches!(
            err,
            WorkerError::CreateFailed { ref label, source: HostError::Create(_) } if label == "analysis"
        ));
        assert!(!manager.is_running());

        assert_eq!(manager.get_worker(&[]).await.unwrap(), FakeProxy(2));
        assert_eq!(host.create_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failure_reaches_every_waiter() {
        let host = FakeHost::new();
        let manager = Arc::new(manager(&host, 10, Some(50)));
        host.hold_creations();
        host.fail_next_create("crashed");

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_worker(&[]).await })
            })
            .collect();
        settle().await;
        host.release_creations();

        for handle in handles {
            assert!(matches!(
                handle.await.unwrap(),
                Err(WorkerError::CreateFailed { .. })
            ));
        }
        assert_eq!(host.create_count(), 1);
        assert_eq!(host.sync_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_failure_keeps_unit() {
        let host = FakeHost::new();
        let manager = manager(&host, 10, Some(50));

        manager.get_worker(&[]).await.unwrap();
        host.fail_next_sync("model gone");

        assert!(matches!(
            manager.get_worker(&[DocumentId::new()]).await,
            Err(WorkerError::SyncFailed(HostError::Sync(_)))
        ));
        assert!(manager.is_running());

        assert_eq!(manager.get_worker(&[]).await.unwrap(), FakeProxy(1));
        assert_eq!(host.destroy_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_during_sync_fails() {
        let host = FakeHost::new();
        let manager = Arc::new(manager(&host, 10, Some(50)));
        let doc = DocumentId::new();

        manager.get_worker(&[]).await.unwrap();
        host.hold_syncs();

        let handle = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_worker(&[doc]).await })
        };
        settle().await;
        assert!(!handle.is_finished());

        manager.dispose();
        host.release_syncs();

        assert!(matches!(handle.await.unwrap(), Err(WorkerError::Disposed)));
        assert!(host.is_destroyed(1));
        assert_eq!(host.create_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_during_sync_hands_out_new_unit() {
        let host = FakeHost::new();
        let manager = Arc::new(manager(&host, 10, Some(50)));
        let doc = DocumentId::new();

        manager.get_worker(&[]).await.unwrap();
        host.hold_syncs();

        let handle = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_worker(&[doc]).await })
        };
        settle().await;

        manager.update_create_data(7);
        host.release_syncs();

        assert_eq!(handle.await.unwrap().unwrap(), FakeProxy(2));
        assert!(host.is_destroyed(1));
        assert!(manager.is_running());
        assert_eq!(
            host.calls()[2..],
            [
                HostCall::Sync {
                    unit: 1,
                    resources: vec![doc],
                },
                HostCall::Destroy { unit: 1 },
                HostCall::Create {
                    unit: 2,
                    label: "analysis".to_string(),
                    module_id: "stats".to_string(),
                    create_data: Some(7),
                },
                HostCall::Sync {
                    unit: 2,
                    resources: vec![doc],
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_creation_without_pending_slot_is_discarded() {
        let host = FakeHost::new();
        let manager = manager(&host, 10, Some(50));
        let mut events = manager.subscribe();

        let result = manager.inner.finish_creation(1, Ok(FakeUnit(1)));

        assert!(matches!(result, Err(WorkerError::CreationAborted)));
        assert!(!manager.is_running());
        assert_eq!(host.calls(), vec![HostCall::Destroy { unit: 1 }]);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_creation_finishing_after_dispose_is_destroyed() {
        let host = FakeHost::new();
        let manager = Arc::new(manager(&host, 10, Some(50)));
        host.hold_creations();

        let handle = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_worker(&[]).await })
        };
        settle().await;
        assert_eq!(host.create_count(), 1);

        manager.dispose();
        host.release_creations();

        assert!(matches!(handle.await.unwrap(), Err(WorkerError::Disposed)));
        assert!(host.is_destroyed(1));
        assert!(!manager.is_running());
        assert_eq!(host.sync_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_during_creation_keeps_pending_unit() {
        let host = FakeHost::new();
        let manager = Arc::new(manager(&host, 10, Some(50)));
        host.hold_creations();

        let handle = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_worker(&[]).await })
        };
        settle().await;

        manager.update_create_data(9);
        host.release_creations();

        assert_eq!(handle.await.unwrap().unwrap(), FakeProxy(1));
        assert!(manager.is_running());
        assert_eq!(host.destroy_count(), 0);

        // The new data applies from the next creation on
        manager.update_create_data(10);
        manager.get_worker(&[]).await.unwrap();
        assert!(matches!(
            host.calls().iter().rev().find(|c| matches!(c, HostCall::Create { .. })),
            Some(HostCall::Create { unit: 2, create_data: Some(10), .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_scenario() {
        let host = FakeHost::new();
        let manager = manager(&host, 5, Some(20));
        let start = Instant::now();
        let doc_x = DocumentId::new();

        let a = manager.get_worker(&[]).await.unwrap();

        time::sleep_until(start + ms(10)).await;
        assert_eq!(manager.get_worker(&[doc_x]).await.unwrap(), a);

        time::sleep_until(start + ms(28)).await;
        assert!(manager.is_running());

        time::sleep_until(start + ms(40)).await;
        assert!(!manager.is_running());

        time::sleep_until(start + ms(41)).await;
        let b = manager.get_worker(&[]).await.unwrap();
        assert_ne!(a, b);

        assert_eq!(
            host.calls(),
            vec![
                HostCall::Create {
                    unit: 1,
                    label: "analysis".to_string(),
                    module_id: "stats".to_string(),
                    create_data: Some(1),
                },
                HostCall::Sync {
                    unit: 1,
                    resources: vec![],
                },
                HostCall::Sync {
                    unit: 1,
                    resources: vec![doc_x],
                },
                HostCall::Destroy { unit: 1 },
                HostCall::Create {
                    unit: 2,
                    label: "analysis".to_string(),
                    module_id: "stats".to_string(),
                    create_data: Some(1),
                },
                HostCall::Sync {
                    unit: 2,
                    resources: vec![],
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_events() {
        let host = FakeHost::new();
        let manager = manager(&host, 10, Some(50));
        let mut events = manager.subscribe();
        let doc = DocumentId::new();

        manager.get_worker(&[doc]).await.unwrap();
        manager.dispose();

        let label = "analysis".to_string();
        assert_eq!(
            events.recv().await.unwrap(),
            WorkerEvent::Created {
                label: label.clone(),
                generation: 1
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            WorkerEvent::Synced {
                label: label.clone(),
                generation: 1,
                resources: vec![doc],
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            WorkerEvent::Stopped {
                label: label.clone(),
                generation: 1,
                reason: StopReason::Disposed,
            }
        );
        assert_eq!(events.recv().await.unwrap(), WorkerEvent::Disposed { label });
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let options = WorkerManagerOptions::<u32>::new("analysis", "stats").with_interval(ms(0));
        assert!(matches!(
            WorkerManager::new(FakeHost::new(), options),
            Err(WorkerError::InvalidInterval)
        ));
    }

    #[test]
    fn test_requires_runtime() {
        let options = WorkerManagerOptions::<u32>::new("analysis", "stats");
        assert!(matches!(
            WorkerManager::new(FakeHost::new(), options),
            Err(WorkerError::Runtime(_))
        ));
    }

    #[test]
    fn test_get_worker_outside_runtime_context() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let host = FakeHost::new();
        let manager = runtime.block_on(async { manager(&host, 10, Some(50)) });

        // This thread has no runtime context; creation runs on the manager's runtime
        let proxy = futures::executor::block_on(manager.get_worker(&[])).unwrap();

        assert_eq!(proxy, FakeProxy(1));
        assert_eq!(host.create_count(), 1);
        manager.dispose();
        assert!(host.is_destroyed(1));
    }

    #[test]
    fn test_options_from_settings() {
        let settings = WorkerSettings {
            interval_ms: 250,
            stop_when_idle: luminex_core::IdleLimit::Never,
        };
        let options = WorkerManagerOptions::<u32>::from_settings("analysis", "stats", &settings);

        assert_eq!(options.interval, ms(250));
        assert_eq!(options.stop_when_idle_for, None);
        assert_eq!(options.create_data, None);
    }
}
