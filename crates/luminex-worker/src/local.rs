//! In-process execution host.
//!
//! [`LocalHost`] runs worker implementations inside the current process.
//! Construction and every proxied call happen on tokio's blocking pool, so
//! CPU-heavy analysis never stalls the async threads the editor uses.
//!
//! ## Learning: Promisified Methods
//!
//! A worker implementation is a plain struct with plain (synchronous)
//! methods. [`LocalProxy::call`] takes a closure over `&W` and hands back a
//! future, so from the caller's side every method looks asynchronous,
//! whether it takes a microsecond or a minute:
//!
//! ```ignore
//! let lines = proxy.call(move |w| w.line_count(doc)).await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use luminex_core::{DocumentId, DocumentSnapshot, DocumentStore};

use crate::host::{ExecutionHost, HostError, UnitConfig};

type Bootstrap<W, C> = Arc<dyn Fn(WorkerContext, Option<C>) -> W + Send + Sync>;

/// What a worker implementation can see of the editor.
///
/// Holds the unit's mirror of the documents synchronized into it.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    label: Arc<str>,
    mirrors: Arc<RwLock<HashMap<DocumentId, DocumentSnapshot>>>,
}

impl WorkerContext {
    fn new(label: &str) -> Self {
        Self {
            label: label.into(),
            mirrors: Arc::default(),
        }
    }

    /// Returns the label of the worker this context belongs to.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the synchronized copy of a document.
    pub fn document(&self, id: DocumentId) -> Option<DocumentSnapshot> {
        self.read().get(&id).cloned()
    }

    /// Returns every synchronized document.
    pub fn documents(&self) -> Vec<DocumentSnapshot> {
        self.read().values().cloned().collect()
    }

    /// Copies the store's current version of each document into the mirror.
    fn sync(&self, store: &DocumentStore, resources: &[DocumentId]) -> usize {
        let mut mirrors = self.mirrors.write().unwrap_or_else(|e| e.into_inner());
        let mut updated = 0;

        for &id in resources {
            match store.snapshot(id) {
                Some(snapshot) => {
                    let current = mirrors.get(&id).map(|m| m.version);
                    if current != Some(snapshot.version) {
                        mirrors.insert(id, snapshot);
                        updated += 1;
                    }
                }
                None => {
                    if mirrors.remove(&id).is_some() {
                        tracing::trace!(%id, "dropped mirror of closed document");
                    }
                }
            }
        }

        updated
    }

    fn clear(&self) {
        self.mirrors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<DocumentId, DocumentSnapshot>> {
        self.mirrors.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// A worker implementation running in-process.
pub struct LocalUnit<W> {
    worker: Arc<W>,
    context: WorkerContext,
    alive: Arc<AtomicBool>,
}

impl<W> LocalUnit<W> {
    /// Returns the unit's context.
    pub fn context(&self) -> &WorkerContext {
        &self.context
    }
}

/// Call proxy for a [`LocalUnit`].
pub struct LocalProxy<W> {
    worker: Arc<W>,
    alive: Arc<AtomicBool>,
}

impl<W> Clone for LocalProxy<W> {
    fn clone(&self) -> Self {
        Self {
            worker: Arc::clone(&self.worker),
            alive: Arc::clone(&self.alive),
        }
    }
}

impl<W: Send + Sync + 'static> LocalProxy<W> {
    /// Runs `method` against the worker on the blocking pool.
    ///
    /// Fails with [`HostError::UnitDestroyed`] once the unit is stopped.
    pub async fn call<R, F>(&self, method: F) -> Result<R, HostError>
    where
        F: FnOnce(&W) -> R + Send + 'static,
        R: Send + 'static,
    {
        if !self.is_alive() {
            return Err(HostError::UnitDestroyed);
        }

        let worker = Arc::clone(&self.worker);
        tokio::task::spawn_blocking(move || method(&worker))
            .await
            .map_err(|e| HostError::Call(e.to_string()))
    }

    /// Returns false once the unit behind this proxy has been destroyed.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// Runs registered worker implementations in-process.
pub struct LocalHost<W, C> {
    store: DocumentStore,
    bootstraps: HashMap<String, Bootstrap<W, C>>,
}

impl<W, C> LocalHost<W, C> {
    /// Creates a host that synchronizes documents from `store`.
    pub fn new(store: DocumentStore) -> Self {
        Self {
            store,
            bootstraps: HashMap::new(),
        }
    }

    /// Registers the constructor for a module id.
    ///
    /// The constructor receives the unit's [`WorkerContext`] and the
    /// creation data, and returns the worker implementation.
    pub fn register<F>(mut self, module_id: impl Into<String>, bootstrap: F) -> Self
    where
        F: Fn(WorkerContext, Option<C>) -> W + Send + Sync + 'static,
    {
        self.bootstraps.insert(module_id.into(), Arc::new(bootstrap));
        self
    }
}

#[async_trait]
impl<W, C> ExecutionHost for LocalHost<W, C>
where
    W: Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    type CreateData = C;
    type Unit = LocalUnit<W>;
    type Proxy = LocalProxy<W>;

    async fn create_unit(&self, config: &UnitConfig<C>) -> Result<LocalUnit<W>, HostError> {
        let bootstrap = self
            .bootstraps
            .get(&config.module_id)
            .cloned()
            .ok_or_else(|| HostError::UnknownModule(config.module_id.clone()))?;

        let context = WorkerContext::new(&config.label);
        let worker_context = context.clone();
        let create_data = config.create_data.clone();

        let worker = tokio::task::spawn_blocking(move || bootstrap(worker_context, create_data))
            .await
            .map_err(|e| HostError::Create(e.to_string()))?;

        tracing::debug!(label = %config.label, module = %config.module_id, "local unit started");

        Ok(LocalUnit {
            worker: Arc::new(worker),
            context,
            alive: Arc::new(AtomicBool::new(true)),
        })
    }

    fn proxy(&self, unit: &LocalUnit<W>) -> LocalProxy<W> {
        LocalProxy {
            worker: Arc::clone(&unit.worker),
            alive: Arc::clone(&unit.alive),
        }
    }

    async fn sync_resources(
        &self,
        unit: &LocalUnit<W>,
        resources: &[DocumentId],
    ) -> Result<(), HostError> {
        if !unit.alive.load(Ordering::Acquire) {
            return Err(HostError::UnitDestroyed);
        }

        let updated = unit.context.sync(&self.store, resources);
        tracing::trace!(
            label = unit.context.label(),
            requested = resources.len(),
            updated,
            "mirrors synced"
        );
        Ok(())
    }

    fn destroy_unit(&self, unit: &LocalUnit<W>) {
        unit.alive.store(false, Ordering::Release);
        unit.context.clear();
        tracing::debug!(label = unit.context.label(), "local unit stopped");
    }
}
