//! Single-flight command bus in front of the worker process.
//!
//! Flow:
//! 1. Callers submit commands through a cloned [`CommandBus`]
//! 2. The supervisor task queues them in admission order
//! 3. One command at a time is written to the worker, with a deadline
//! 4. The next response line (or the deadline, or the worker's exit) resolves it
//! 5. On worker exit: fail the in-flight command, keep the queue, restart after a cooldown

mod handle;
mod queue;
mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::worker::WorkerSpawner;

pub use handle::{CommandBus, ResponseHandle, SupervisorTask};

/// Characters of an undecodable response kept for diagnosis.
pub const RESPONSE_PREVIEW_CHARS: usize = 200;

/// Outcome delivered to a caller.
pub type BusResult = Result<serde_json::Value, BusError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// No worker is running, or it died with the command in flight.
    #[error("worker process unavailable: {0}")]
    ProcessUnavailable(String),
    #[error("worker did not respond within {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("invalid JSON from worker: {preview}")]
    MalformedResponse { preview: String },
}

impl BusError {
    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        Self::ProcessUnavailable(reason.into())
    }

    pub(crate) fn malformed(line: &str) -> Self {
        Self::MalformedResponse {
            preview: line.chars().take(RESPONSE_PREVIEW_CHARS).collect(),
        }
    }
}

/// Lifecycle state of the worker, as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Starting,
    Running,
    Terminated,
    /// Explicit shutdown; no further restarts.
    Stopped,
}

/// Point-in-time view of the bus, published on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusSnapshot {
    pub state: WorkerState,
    pub queued: usize,
    pub in_flight: bool,
    pub restarts: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// When the current worker was spawned (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

impl BusSnapshot {
    fn starting() -> Self {
        Self {
            state: WorkerState::Starting,
            queued: 0,
            in_flight: false,
            restarts: 0,
            pid: None,
            started_at: None,
        }
    }
}

pub struct BusConfig {
    pub command_timeout: Duration,
    pub restart_cooldown: Duration,
    pub shutdown_grace: Duration,
    /// How long a queued command may wait while no worker is running.
    pub queue_timeout: Duration,
    pub spawner: Arc<dyn WorkerSpawner>,
}

impl BusConfig {
    pub fn new(spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self {
            command_timeout: Duration::from_secs(10),
            restart_cooldown: Duration::from_millis(500),
            shutdown_grace: Duration::from_millis(500),
            queue_timeout: Duration::from_secs(30),
            spawner,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_restart_cooldown(mut self, cooldown: Duration) -> Self {
        self.restart_cooldown = cooldown;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }
}
