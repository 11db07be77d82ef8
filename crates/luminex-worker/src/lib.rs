//! # Luminex Worker
//!
//! Lifecycle management for a background analysis worker.
//!
//! ## What is a worker here?
//!
//! Analysis that is too expensive for the editing thread (diagnostics,
//! statistics, formatting) runs in a separate execution unit. Starting that
//! unit costs memory and time, so a [`WorkerManager`]:
//! - Starts it lazily, on the first [`WorkerManager::get_worker`] call
//! - Stops it after it has been idle for a while
//! - Synchronizes the documents a request needs before handing out a proxy
//! - Restarts it from scratch when its creation data changes
//!
//! ## Hosts
//!
//! How a unit is actually run is behind the [`ExecutionHost`] trait.
//! [`LocalHost`] runs worker implementations in-process on the blocking
//! thread pool; tests use `FakeHost`, which records every call.
//!
//! ```ignore
//! let host = LocalHost::new(store.clone())
//!     .register("stats", |ctx, _data: Option<()>| TextStats::new(ctx));
//! let manager = WorkerManager::new(host, WorkerManagerOptions::new("analysis", "stats"))?;
//!
//! let proxy = manager.get_worker(&[doc]).await?;
//! let stats = proxy.call(move |w| w.stats(doc)).await?;
//! ```

pub mod host;
pub mod local;
pub mod manager;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use host::{ExecutionHost, HostError, UnitConfig};
pub use local::{LocalHost, LocalProxy, LocalUnit, WorkerContext};
pub use manager::{WorkerManager, WorkerManagerOptions};

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeHost, FakeProxy, FakeUnit, HostCall};

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Worker manager errors.
///
/// `Clone` because a single creation outcome is shared by every caller
/// waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker manager has been disposed")]
    Disposed,

    #[error("Failed to create worker '{label}': {source}")]
    CreateFailed {
        label: String,
        #[source]
        source: HostError,
    },

    #[error("Failed to synchronize resources: {0}")]
    SyncFailed(#[source] HostError),

    #[error("Worker creation ended without a result")]
    CreationAborted,

    #[error("Idle-check interval must be greater than zero")]
    InvalidInterval,

    #[error("No async runtime: {0}")]
    Runtime(String),
}
