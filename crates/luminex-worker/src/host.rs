//! The execution host capability.
//!
//! ## Learning: Traits as Capabilities
//!
//! The manager never knows whether a unit is a thread, a process or a
//! test double. It only needs four operations, so those four operations
//! are the trait. Associated types let each host pick its own unit and
//! proxy representations without boxing.

use async_trait::async_trait;
use luminex_core::DocumentId;

/// Everything a host needs to create a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitConfig<C> {
    /// Identifies the worker in logs
    pub label: String,

    /// Which worker implementation to load
    pub module_id: String,

    /// Opaque data handed to the implementation's constructor
    pub create_data: Option<C>,
}

/// Errors reported by an execution host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("Unknown worker module: {0}")]
    UnknownModule(String),

    #[error("Failed to create unit: {0}")]
    Create(String),

    #[error("Failed to sync resources: {0}")]
    Sync(String),

    #[error("Unit has been destroyed")]
    UnitDestroyed,

    #[error("Call failed: {0}")]
    Call(String),
}

/// Creates, synchronizes and destroys background execution units.
#[async_trait]
pub trait ExecutionHost: Send + Sync + 'static {
    /// Data passed to a unit at creation time.
    type CreateData: Clone + Send + Sync + 'static;

    /// A running unit.
    type Unit: Send + Sync + 'static;

    /// Handle through which callers invoke the unit.
    type Proxy: Clone + Send + Sync + 'static;

    /// Creates and starts a unit.
    async fn create_unit(
        &self,
        config: &UnitConfig<Self::CreateData>,
    ) -> Result<Self::Unit, HostError>;

    /// Returns the call proxy for a unit.
    fn proxy(&self, unit: &Self::Unit) -> Self::Proxy;

    /// Brings the unit's view of `resources` up to date.
    async fn sync_resources(
        &self,
        unit: &Self::Unit,
        resources: &[DocumentId],
    ) -> Result<(), HostError>;

    /// Stops and releases a unit.
    fn destroy_unit(&self, unit: &Self::Unit);
}
