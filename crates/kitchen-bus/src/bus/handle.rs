//! Caller-facing handle to the command bus.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::supervisor::{Submission, Supervisor};
use super::{BusConfig, BusError, BusResult, BusSnapshot};
use crate::bridge::protocol::Command;

/// Cheap, cloneable entry point to the single worker.
///
/// Every clone feeds the same queue. Dropping the last clone shuts the
/// supervisor down just like [`CommandBus::shutdown`].
#[derive(Clone)]
pub struct CommandBus {
    submit_tx: mpsc::UnboundedSender<Submission>,
    snapshot_rx: watch::Receiver<BusSnapshot>,
    stop: CancellationToken,
}

impl CommandBus {
    /// Spawn the supervisor task and start the first worker.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(config: BusConfig) -> (Self, SupervisorTask) {
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(BusSnapshot::starting());
        let stop = CancellationToken::new();

        let supervisor = Supervisor::new(config, submit_rx, snapshot_tx, stop.clone());
        let task = tokio::spawn(supervisor.run());

        (
            Self {
                submit_tx,
                snapshot_rx,
                stop,
            },
            SupervisorTask(task),
        )
    }

    /// Admit a command to the queue.
    ///
    /// Admission is immediate; the returned handle resolves exactly once.
    pub fn submit(&self, command: Command) -> ResponseHandle {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.submit_tx.send((command, reply_tx)).is_err() {
            // The reply sender went down with the rejected message, so the
            // handle resolves as unavailable.
            tracing::debug!("Command submitted after bus shutdown");
        }
        ResponseHandle { reply_rx }
    }

    /// Submit and wait for the outcome.
    pub async fn send(&self, command: Command) -> BusResult {
        self.submit(command).wait().await
    }

    pub fn snapshot(&self) -> BusSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<BusSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Stop the worker (QUIT, grace period, kill) and halt restarts.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }
}

/// Pending result of a submitted command.
pub struct ResponseHandle {
    reply_rx: oneshot::Receiver<BusResult>,
}

impl ResponseHandle {
    pub async fn wait(self) -> BusResult {
        self.reply_rx
            .await
            .unwrap_or_else(|_| Err(BusError::unavailable("command bus is shut down")))
    }
}

/// Join handle of the supervisor task.
pub struct SupervisorTask(JoinHandle<()>);

impl SupervisorTask {
    /// Wait until the supervisor has stopped the worker and exited.
    pub async fn join(self) {
        if let Err(e) = self.0.await {
            tracing::error!(error = %e, "Supervisor task failed");
        }
    }
}
