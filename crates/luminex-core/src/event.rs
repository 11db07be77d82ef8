//! Lifecycle events for background workers.
//!
//! ## Learning: Observer Pattern in Rust
//!
//! Rust's ownership model makes traditional observer patterns tricky.
//! We use `tokio::sync::broadcast` for a safe, async-friendly event bus.
//!
//! Key differences from OOP observers:
//! - No object references to manage
//! - Events are values, not callbacks
//! - Subscribers receive copies (Clone)

use crate::document::DocumentId;
use tokio::sync::broadcast;

/// Why a worker was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Unused for longer than the idle threshold
    Idle,
    /// Creation data was replaced
    Reconfigured,
    /// The manager was disposed
    Disposed,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            StopReason::Idle => "idle",
            StopReason::Reconfigured => "reconfigured",
            StopReason::Disposed => "disposed",
        };
        f.write_str(reason)
    }
}

/// Events emitted over a worker's lifetime.
///
/// `generation` counts unit creations within one manager, starting at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A unit was created and is now live
    Created { label: String, generation: u64 },
    /// The host failed to create a unit
    CreateFailed { label: String, message: String },
    /// A unit was synchronized with the given documents
    Synced {
        label: String,
        generation: u64,
        resources: Vec<DocumentId>,
    },
    /// A unit was destroyed
    Stopped {
        label: String,
        generation: u64,
        reason: StopReason,
    },
    /// The manager itself was disposed
    Disposed { label: String },
}

/// Event bus for broadcasting worker events.
pub struct EventBus {
    sender: broadcast::Sender<WorkerEvent>,
}

impl EventBus {
    /// Creates a new event bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    /// Emits an event to all subscribers.
    pub fn emit(&self, event: WorkerEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribes to events.
    ///
    /// Returns a receiver that will get all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
