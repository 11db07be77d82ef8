//! Fake execution host for testing

use crate::host::{ExecutionHost, HostError, UnitConfig};
use async_trait::async_trait;
use luminex_core::DocumentId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// Recorded host call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall<C> {
    Create {
        unit: u64,
        label: String,
        module_id: String,
        create_data: Option<C>,
    },
    Sync {
        unit: u64,
        resources: Vec<DocumentId>,
    },
    Destroy {
        unit: u64,
    },
}

/// Unit created by [`FakeHost`]; the number is its creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FakeUnit(pub u64);

/// Proxy handed out for a [`FakeUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FakeProxy(pub u64);

#[derive(Debug)]
struct FakeState<C> {
    calls: Vec<HostCall<C>>,
    next_unit: u64,
    destroyed: HashSet<u64>,
    fail_create: Option<String>,
    fail_sync: Option<String>,
}

impl<C> Default for FakeState<C> {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            next_unit: 0,
            destroyed: HashSet::new(),
            fail_create: None,
            fail_sync: None,
        }
    }
}

/// Fake execution host for testing
///
/// Creations and syncs complete immediately unless held with
/// [`FakeHost::hold_creations`] / [`FakeHost::hold_syncs`].
#[derive(Clone)]
pub struct FakeHost<C> {
    state: Arc<Mutex<FakeState<C>>>,
    create_gate: Arc<watch::Sender<bool>>,
    sync_gate: Arc<watch::Sender<bool>>,
}

impl<C> Default for FakeHost<C> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            create_gate: Arc::new(watch::channel(true).0),
            sync_gate: Arc::new(watch::channel(true).0),
        }
    }
}

impl<C: Clone> FakeHost<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<HostCall<C>> {
        self.lock().calls.clone()
    }

    /// Number of `create_unit` calls so far
    pub fn create_count(&self) -> usize {
        self.count(|call| matches!(call, HostCall::Create { .. }))
    }

    /// Number of `sync_resources` calls so far
    pub fn sync_count(&self) -> usize {
        self.count(|call| matches!(call, HostCall::Sync { .. }))
    }

    /// Number of `destroy_unit` calls so far
    pub fn destroy_count(&self) -> usize {
        self.count(|call| matches!(call, HostCall::Destroy { .. }))
    }

    /// Whether the given unit has been destroyed
    pub fn is_destroyed(&self, unit: u64) -> bool {
        self.lock().destroyed.contains(&unit)
    }

    /// Make the next `create_unit` call fail
    pub fn fail_next_create(&self, message: &str) {
        self.lock().fail_create = Some(message.to_string());
    }

    /// Make the next `sync_resources` call fail
    pub fn fail_next_sync(&self, message: &str) {
        self.lock().fail_sync = Some(message.to_string());
    }

    /// Block creations (after they are recorded) until released
    pub fn hold_creations(&self) {
        self.create_gate.send_replace(false);
    }

    pub fn release_creations(&self) {
        self.create_gate.send_replace(true);
    }

    /// Block syncs (after they are recorded) until released
    pub fn hold_syncs(&self) {
        self.sync_gate.send_replace(false);
    }

    pub fn release_syncs(&self) {
        self.sync_gate.send_replace(true);
    }

    fn count(&self, pred: impl Fn(&HostCall<C>) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| pred(call)).count()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState<C>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn pass(gate: &watch::Sender<bool>) {
    let mut open = gate.subscribe();
    // The sender lives as long as the host, so this cannot fail
    let _ = open.wait_for(|open| *open).await;
}

#[async_trait]
impl<C> ExecutionHost for FakeHost<C>
where
    C: Clone + Send + Sync + 'static,
{
    type CreateData = C;
    type Unit = FakeUnit;
    type Proxy = FakeProxy;

    async fn create_unit(&self, config: &UnitConfig<C>) -> Result<FakeUnit, HostError> {
        let (unit, failure) = {
            let mut state = self.lock();
            state.next_unit += 1;
            let unit = state.next_unit;
            state.calls.push(HostCall::Create {
                unit,
                label: config.label.clone(),
                module_id: config.module_id.clone(),
                create_data: config.create_data.clone(),
            });
            (unit, state.fail_create.take())
        };

        pass(&self.create_gate).await;

        match failure {
            Some(message) => Err(HostError::Create(message)),
            None => Ok(FakeUnit(unit)),
        }
    }

    fn proxy(&self, unit: &FakeUnit) -> FakeProxy {
        FakeProxy(unit.0)
    }

    async fn sync_resources(
        &self,
        unit: &FakeUnit,
        resources: &[DocumentId],
    ) -> Result<(), HostError> {
        let failure = {
            let mut state = self.lock();
            state.calls.push(HostCall::Sync {
                unit: unit.0,
                resources: resources.to_vec(),
            });
            if state.destroyed.contains(&unit.0) {
                return Err(HostError::UnitDestroyed);
            }
            state.fail_sync.take()
        };

        pass(&self.sync_gate).await;

        match failure {
            Some(message) => Err(HostError::Sync(message)),
            None => Ok(()),
        }
    }

    fn destroy_unit(&self, unit: &FakeUnit) {
        let mut state = self.lock();
        state.calls.push(HostCall::Destroy { unit: unit.0 });
        state.destroyed.insert(unit.0);
    }
}
