//! # Luminex Core
//!
//! Shared types for the background analysis workers.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Editing surface                      │
//! │  ┌───────────────┐   ┌──────────┐   ┌─────────────────┐  │
//! │  │ DocumentStore │   │  Config  │   │    EventBus     │  │
//! │  └───────┬───────┘   └────┬─────┘   └────────┬────────┘  │
//! │          │ snapshots      │ settings         │ events    │
//! │  ┌───────┴────────────────┴──────────────────┴────────┐  │
//! │  │            luminex-worker: WorkerManager            │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Learning: Module Organization
//!
//! Rust modules map to files:
//! - `mod foo;` looks for `foo.rs` or `foo/mod.rs`
//! - `pub use` re-exports items for cleaner public APIs

pub mod config;
pub mod document;
pub mod event;

pub use config::{Config, ConfigError, IdleLimit, WorkerSettings};
pub use document::{Document, DocumentId, DocumentSnapshot, DocumentStore};
pub use event::{EventBus, StopReason, WorkerEvent};

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}
