//! Supervisor task - owns the worker, the queue and the in-flight slot.
//!
//! Everything that mutates bus state runs on this one task, so the
//! single-flight rule needs no locks: a command is only written when the
//! in-flight slot is empty, and the slot is only emptied by the line, deadline
//! or exit that resolves it.

use std::io;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::queue::{CommandQueue, PendingRequest};
use super::{BusConfig, BusError, BusResult, BusSnapshot, WorkerState};
use crate::bridge::codec::LineCodec;
use crate::bridge::protocol::{Command, QUIT_LINE};
use crate::worker::{WorkerIo, WorkerOutput, WorkerProcess, WorkerStdin, forward_stderr};

/// What a [`super::CommandBus`] sends to the supervisor.
pub(crate) type Submission = (Command, oneshot::Sender<BusResult>);

type LineReader = FramedRead<WorkerOutput, LineCodec>;
type LineWriter = FramedWrite<WorkerStdin, LineCodec>;

struct InFlight {
    request: PendingRequest,
    dispatched_at: Instant,
    deadline: Instant,
}

pub(crate) struct Supervisor {
    config: BusConfig,
    submissions: mpsc::UnboundedReceiver<Submission>,
    snapshot_tx: watch::Sender<BusSnapshot>,
    stop: CancellationToken,

    queue: CommandQueue,
    in_flight: Option<InFlight>,

    state: WorkerState,
    writer: Option<LineWriter>,
    reader: Option<LineReader>,
    process: Option<Box<dyn WorkerProcess>>,
    pid: Option<u32>,
    started_at: Option<String>,
    restart_at: Option<Instant>,
    /// When the worker last left `Running`; queue waits are measured from here.
    unavailable_since: Option<Instant>,
    spawned: u64,
}

impl Supervisor {
    pub(crate) fn new(
        config: BusConfig,
        submissions: mpsc::UnboundedReceiver<Submission>,
        snapshot_tx: watch::Sender<BusSnapshot>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            config,
            submissions,
            snapshot_tx,
            stop,
            queue: CommandQueue::default(),
            in_flight: None,
            state: WorkerState::Starting,
            writer: None,
            reader: None,
            process: None,
            pid: None,
            started_at: None,
            restart_at: None,
            unavailable_since: None,
            spawned: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        self.start_worker();

        loop {
            self.advance().await;
            self.publish();

            let command_deadline = self.in_flight.as_ref().map(|f| f.deadline);
            let queue_deadline = self.queue_deadline();

            tokio::select! {
                biased;

                _ = self.stop.cancelled() => {
                    tracing::info!("Shutdown requested");
                    break;
                }

                // Lines before exits: a response written just before the
                // worker died still belongs to the in-flight command.
                line = next_line(&mut self.reader) => match line {
                    Some(Ok(line)) => self.on_line(line),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Worker stdout read failed");
                        self.reader = None;
                    }
                    None => {
                        tracing::debug!(pid = self.pid, "Worker stdout closed");
                        self.reader = None;
                    }
                },

                exit = wait_exit(&mut self.process) => self.on_exit(exit),

                _ = sleep_until_opt(command_deadline) => self.on_timeout(),

                _ = sleep_until_opt(self.restart_at) => self.start_worker(),

                _ = sleep_until_opt(queue_deadline) => self.expire_queue(),

                submission = self.submissions.recv() => match submission {
                    Some((command, reply)) => self.admit(command, reply),
                    None => {
                        tracing::info!("All bus handles dropped");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
    }

    fn admit(&mut self, command: Command, reply: oneshot::Sender<BusResult>) {
        let verb = command.verb().to_string();
        let seq = self.queue.admit(command, reply, Instant::now());
        tracing::debug!(
            target: "kitchen_bus::command",
            seq,
            %verb,
            queued = self.queue.len(),
            "Command admitted"
        );
    }

    /// Write the head of the queue if the worker is idle and running.
    async fn advance(&mut self) {
        if self.in_flight.is_some() || self.state != WorkerState::Running {
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let Some(request) = self.queue.pop() else {
            return;
        };

        // A worker that stops reading can stall the write; shutdown must not
        // wait behind it.
        let written = tokio::select! {
            biased;

            written = tokio::time::timeout(
                self.config.command_timeout,
                writer.send(&request.command),
            ) => written,

            _ = self.stop.cancelled() => {
                tracing::debug!(seq = request.seq, "Shutdown interrupted a command write");
                // The worker may hold a partial line, so QUIT is not sent after it.
                self.writer = None;
                self.queue.restore(request);
                return;
            }
        };
        match written {
            Ok(Ok(())) => {
                let now = Instant::now();
                tracing::debug!(
                    target: "kitchen_bus::command",
                    seq = request.seq,
                    verb = request.command.verb(),
                    waited_ms = now.duration_since(request.admitted_at).as_millis() as u64,
                    "Command dispatched"
                );
                self.in_flight = Some(InFlight {
                    request,
                    dispatched_at: now,
                    deadline: now + self.config.command_timeout,
                });
            }
            Ok(Err(e)) => {
                // Broken pipe: the line never reached a live worker.
                tracing::warn!(
                    seq = request.seq,
                    error = %e,
                    "Failed to write command, requeueing"
                );
                self.queue.restore(request);
                self.abandon_worker();
            }
            Err(_) => {
                // Possibly half written, so the worker's input is now garbage.
                tracing::warn!(seq = request.seq, "Worker stopped reading its input");
                request.resolve(Err(BusError::Timeout(self.config.command_timeout)));
                self.abandon_worker();
            }
        }
    }

    fn on_line(&mut self, line: String) {
        let Some(flight) = self.in_flight.take() else {
            tracing::debug!(
                target: "kitchen_bus::command",
                line = %preview(&line),
                "Discarding worker line with no command awaiting it"
            );
            return;
        };

        let seq = flight.request.seq;
        let elapsed_ms = flight.dispatched_at.elapsed().as_millis() as u64;
        let result = serde_json::from_str::<serde_json::Value>(&line)
            .map_err(|_| BusError::malformed(&line));
        match &result {
            Ok(_) => tracing::info!(
                target: "kitchen_bus::command",
                seq,
                verb = flight.request.command.verb(),
                elapsed_ms,
                "Command completed"
            ),
            Err(e) => tracing::warn!(
                target: "kitchen_bus::command",
                seq,
                verb = flight.request.command.verb(),
                error = %e,
                "Command failed"
            ),
        }
        flight.request.resolve(result);
    }

    fn on_timeout(&mut self) {
        let Some(flight) = self.in_flight.take() else {
            return;
        };
        tracing::warn!(
            target: "kitchen_bus::command",
            seq = flight.request.seq,
            verb = flight.request.command.verb(),
            timeout_ms = self.config.command_timeout.as_millis() as u64,
            "Command timed out"
        );
        flight
            .request
            .resolve(Err(BusError::Timeout(self.config.command_timeout)));
    }

    fn on_exit(&mut self, exit: io::Result<Option<i32>>) {
        match exit {
            Ok(code) => tracing::warn!(pid = self.pid, exit_code = ?code, "Worker exited"),
            Err(e) => tracing::error!(pid = self.pid, error = %e, "Failed to wait for worker"),
        }
        self.detach_worker();
        self.fail_in_flight("worker exited while the command was in flight");
        self.set_state(WorkerState::Terminated);
        self.schedule_restart();
    }

    fn start_worker(&mut self) {
        self.restart_at = None;
        self.set_state(WorkerState::Starting);
        self.publish();

        self.fail_in_flight("worker restarted while the command was in flight");
        self.detach_worker();

        match self.config.spawner.spawn() {
            Ok(io) => {
                self.attach_worker(io);
                self.set_state(WorkerState::Running);
                tracing::info!(pid = self.pid, restarts = self.restarts(), "Worker started");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn worker");
                self.set_state(WorkerState::Terminated);
                self.schedule_restart();
            }
        }
    }

    fn attach_worker(&mut self, io: WorkerIo) {
        let WorkerIo {
            stdin,
            stdout,
            stderr,
            process,
        } = io;

        self.pid = process.id();
        if let Some(stderr) = stderr {
            forward_stderr(stderr, self.pid);
        }
        // New codecs, so nothing buffered from the previous worker survives.
        self.writer = Some(FramedWrite::new(stdin, LineCodec::new()));
        self.reader = Some(FramedRead::new(stdout, LineCodec::new()));
        self.process = Some(process);
        self.started_at = Some(chrono::Utc::now().to_rfc3339());
        self.spawned += 1;
    }

    fn detach_worker(&mut self) {
        self.writer = None;
        self.reader = None;
        self.process = None;
        self.pid = None;
        self.started_at = None;
    }

    /// Kill a worker whose input can no longer be trusted; the exit
    /// notification then drives the normal restart path.
    fn abandon_worker(&mut self) {
        self.writer = None;
        if let Some(process) = self.process.as_mut()
            && let Err(e) = process.start_kill()
        {
            tracing::warn!(pid = self.pid, error = %e, "Failed to kill worker");
        }
    }

    fn schedule_restart(&mut self) {
        let cooldown = self.config.restart_cooldown;
        tracing::info!(retry_in_ms = cooldown.as_millis() as u64, "Scheduling worker restart");
        self.restart_at = Some(Instant::now() + cooldown);
    }

    fn fail_in_flight(&mut self, reason: &str) {
        if let Some(flight) = self.in_flight.take() {
            tracing::warn!(
                target: "kitchen_bus::command",
                seq = flight.request.seq,
                verb = flight.request.command.verb(),
                reason,
                "Failing in-flight command"
            );
            flight.request.resolve(Err(BusError::unavailable(reason)));
        }
    }

    fn set_state(&mut self, state: WorkerState) {
        if state == WorkerState::Running {
            self.unavailable_since = None;
        } else if self.unavailable_since.is_none() {
            self.unavailable_since = Some(Instant::now());
        }
        self.state = state;
    }

    /// Queued commands only age out while there is no worker to serve them.
    fn queue_deadline(&self) -> Option<Instant> {
        if self.state == WorkerState::Running {
            return None;
        }
        let since = self.unavailable_since?;
        self.queue.oldest_deadline(since, self.config.queue_timeout)
    }

    fn expire_queue(&mut self) {
        let Some(since) = self.unavailable_since else {
            return;
        };
        let max_wait = self.config.queue_timeout;
        for request in self.queue.take_expired(Instant::now(), since, max_wait) {
            tracing::warn!(
                target: "kitchen_bus::command",
                seq = request.seq,
                verb = request.command.verb(),
                "Command expired waiting for a worker"
            );
            request.resolve(Err(BusError::unavailable(format!(
                "no worker became available within {}ms",
                max_wait.as_millis()
            ))));
        }
    }

    async fn shutdown(&mut self) {
        self.restart_at = None;
        self.submissions.close();

        if let Some(writer) = self.writer.as_mut()
            && let Ok(quit) = Command::raw(QUIT_LINE)
        {
            let sent = tokio::time::timeout(self.config.shutdown_grace, writer.send(&quit)).await;
            if !matches!(sent, Ok(Ok(()))) {
                tracing::debug!("Could not deliver QUIT to worker");
            }
        }
        // Closing stdin as well, for workers that stop on end of input.
        self.writer = None;

        if self.process.is_some() {
            self.await_exit(self.config.shutdown_grace).await;
        }
        self.detach_worker();

        self.fail_in_flight("command bus is shutting down");
        for request in self.queue.drain() {
            request.resolve(Err(BusError::unavailable("command bus is shutting down")));
        }
        while let Ok((_, reply)) = self.submissions.try_recv() {
            let _ = reply.send(Err(BusError::unavailable("command bus is shutting down")));
        }

        self.state = WorkerState::Stopped;
        self.publish();
        tracing::info!("Command bus stopped");
    }

    /// Keep serving the in-flight command while the worker winds down, then
    /// kill it if it outlives the grace period.
    async fn await_exit(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        loop {
            tokio::select! {
                biased;

                line = next_line(&mut self.reader) => match line {
                    Some(Ok(line)) => self.on_line(line),
                    _ => self.reader = None,
                },

                exit = wait_exit(&mut self.process) => {
                    match exit {
                        Ok(code) => {
                            tracing::info!(pid = self.pid, exit_code = ?code, "Worker exited");
                        }
                        Err(e) => {
                            tracing::warn!(pid = self.pid, error = %e, "Failed to wait for worker");
                        }
                    }
                    self.process = None;
                    return;
                }

                _ = sleep_until(deadline) => break,
            }
        }

        if let Some(mut process) = self.process.take() {
            tracing::warn!(pid = self.pid, "Worker did not exit within grace period, killing");
            if let Err(e) = process.start_kill() {
                tracing::error!(pid = self.pid, error = %e, "Failed to kill worker");
                return;
            }
            if let Err(e) = process.wait().await {
                tracing::warn!(pid = self.pid, error = %e, "Failed to reap worker");
            }
        }
    }

    fn restarts(&self) -> u64 {
        self.spawned.saturating_sub(1)
    }

    fn snapshot(&self) -> BusSnapshot {
        BusSnapshot {
            state: self.state,
            queued: self.queue.len(),
            in_flight: self.in_flight.is_some(),
            restarts: self.restarts(),
            pid: self.pid,
            started_at: self.started_at.clone(),
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

async fn next_line(reader: &mut Option<LineReader>) -> Option<io::Result<String>> {
    match reader {
        Some(reader) => reader.next().await,
        None => std::future::pending().await,
    }
}

async fn wait_exit(process: &mut Option<Box<dyn WorkerProcess>>) -> io::Result<Option<i32>> {
    match process {
        Some(process) => process.wait().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn preview(line: &str) -> String {
    line.chars().take(super::RESPONSE_PREVIEW_CHARS).collect()
}
