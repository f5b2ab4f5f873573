//! In-memory workers for driving the bus in tests.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::bridge::protocol::Command;
use crate::worker::{SpawnError, WorkerIo, WorkerProcess, WorkerSpawner};

const PIPE_CAPACITY: usize = 64 * 1024;

pub(crate) fn command(line: &str) -> Command {
    Command::raw(line).unwrap()
}

/// Spawner that hands the worker side of every spawn to the test.
pub(crate) struct FakeSpawner {
    workers: mpsc::UnboundedSender<FakeWorker>,
    failures: AtomicU32,
    next_pid: AtomicU32,
}

impl FakeSpawner {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<FakeWorker>) {
        let (workers, rx) = mpsc::unbounded_channel();
        let spawner = Self {
            workers,
            failures: AtomicU32::new(0),
            next_pid: AtomicU32::new(1000),
        };
        (spawner, rx)
    }

    /// Fail the next `n` spawns; `u32::MAX` fails forever.
    pub(crate) fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

impl WorkerSpawner for FakeSpawner {
    fn spawn(&self) -> Result<WorkerIo, SpawnError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if failing {
            return Err(SpawnError::Other("scripted spawn failure".to_string()));
        }

        let (bus_stdin, worker_stdin) = tokio::io::duplex(PIPE_CAPACITY);
        let (worker_stdout, bus_stdout) = tokio::io::duplex(PIPE_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();
        let killed = Arc::new(AtomicBool::new(false));
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);

        let worker = FakeWorker {
            lines: Some(FramedRead::new(worker_stdin, LinesCodec::new())),
            stdout: worker_stdout,
            exit: Some(exit_tx),
            killed: Arc::clone(&killed),
        };
        let _ = self.workers.send(worker);

        Ok(WorkerIo {
            stdin: Box::new(bus_stdin),
            stdout: Box::new(bus_stdout),
            stderr: None,
            process: Box::new(FakeProcess {
                pid,
                exit: exit_rx,
                exited: None,
                killed,
            }),
        })
    }
}

struct FakeProcess {
    pid: u32,
    exit: oneshot::Receiver<Option<i32>>,
    exited: Option<Option<i32>>,
    killed: Arc<AtomicBool>,
}

#[async_trait]
impl WorkerProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        if let Some(code) = self.exited {
            return Ok(code);
        }
        if self.killed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        // A dropped FakeWorker counts as a crash.
        let code = (&mut self.exit).await.unwrap_or(None);
        self.exited = Some(code);
        Ok(code)
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// The test's end of a fake worker's pipes.
pub(crate) struct FakeWorker {
    lines: Option<FramedRead<DuplexStream, LinesCodec>>,
    stdout: DuplexStream,
    exit: Option<oneshot::Sender<Option<i32>>>,
    killed: Arc<AtomicBool>,
}

impl FakeWorker {
    pub(crate) async fn read_line(&mut self) -> String {
        self.lines
            .as_mut()
            .expect("stdin already dropped")
            .next()
            .await
            .expect("bus closed worker stdin")
            .expect("invalid command line")
    }

    pub(crate) async fn try_read_line(&mut self, wait: Duration) -> Option<String> {
        let lines = self.lines.as_mut()?;
        match tokio::time::timeout(wait, lines.next()).await {
            Ok(Some(Ok(line))) => Some(line),
            _ => None,
        }
    }

    pub(crate) async fn reply(&mut self, line: &str) {
        self.write_raw(format!("{line}\n").as_bytes()).await;
    }

    pub(crate) async fn write_raw(&mut self, bytes: &[u8]) {
        self.stdout.write_all(bytes).await.unwrap();
    }

    /// Close the worker's input so that writes from the bus fail.
    pub(crate) fn drop_stdin(&mut self) {
        self.lines = None;
    }

    pub(crate) fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub(crate) fn exit(mut self, code: Option<i32>) {
        if let Some(tx) = self.exit.take() {
            let _ = tx.send(code);
        }
    }
}

/// Answer every command line with `respond(line)`, recording what was seen.
pub(crate) fn spawn_responder<F>(
    mut worker: FakeWorker,
    respond: F,
) -> mpsc::UnboundedReceiver<String>
where
    F: Fn(&str) -> Option<String> + Send + 'static,
{
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(lines) = worker.lines.as_mut() {
            let Some(Ok(line)) = lines.next().await else {
                break;
            };
            let answer = respond(&line);
            let _ = seen_tx.send(line);
            if let Some(answer) = answer {
                worker.reply(&answer).await;
            }
        }
    });
    seen_rx
}
