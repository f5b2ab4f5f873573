//! Worker subprocess spawning.
//!
//! The bus never touches `tokio::process` directly: it asks a [`WorkerSpawner`]
//! for a [`WorkerIo`] bundle, which keeps the supervisor drivable by in-memory
//! workers.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio_util::codec::FramedRead;

use crate::bridge::codec::LineCodec;

/// File name of the worker executable shipped next to the server binary.
pub const WORKER_FILE_STEM: &str = "cozinha_api";

pub type WorkerStdin = Box<dyn AsyncWrite + Send + Unpin>;
pub type WorkerOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Streams and process handle of one worker lifetime.
pub struct WorkerIo {
    pub stdin: WorkerStdin,
    pub stdout: WorkerOutput,
    /// Diagnostic stream; only ever logged.
    pub stderr: Option<WorkerOutput>,
    pub process: Box<dyn WorkerProcess>,
}

/// Lifetime control over a spawned worker.
#[async_trait]
pub trait WorkerProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit, returning its exit code if it had one.
    ///
    /// Must be cancel safe: the supervisor polls it inside `select!`.
    async fn wait(&mut self) -> io::Result<Option<i32>>;

    /// Ask the process to die without waiting for it.
    fn start_kill(&mut self) -> io::Result<()>;
}

#[async_trait]
impl WorkerProcess for Child {
    fn id(&self) -> Option<u32> {
        Child::id(self)
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok(Child::wait(self).await?.code())
    }

    fn start_kill(&mut self) -> io::Result<()> {
        Child::start_kill(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] io::Error),
    #[error("spawn failed: {0}")]
    Other(String),
}

/// Extension point for different worker spawn strategies.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self) -> Result<WorkerIo, SpawnError>;
}

/// Spawns an executable with piped stdio.
#[derive(Debug, Clone)]
pub struct ExecutableSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl ExecutableSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl WorkerSpawner for ExecutableSpawner {
    fn spawn(&self) -> Result<WorkerIo, SpawnError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // The worker resolves its data files relative to its own directory.
        if let Some(dir) = self.program.parent()
            && !dir.as_os_str().is_empty()
        {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SpawnError::Other("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SpawnError::Other("stdout not captured".to_string()))?;
        let stderr = child.stderr.take();

        Ok(WorkerIo {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: stderr.map(|s| Box::new(s) as WorkerOutput),
            process: Box::new(child),
        })
    }
}

/// Default worker location: next to the running executable.
pub fn default_worker_path() -> io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "executable has no parent dir"))?;
    Ok(worker_path_in(dir))
}

/// Platform file name of the worker executable inside `dir`.
pub fn worker_path_in(dir: &Path) -> PathBuf {
    dir.join(format!("{WORKER_FILE_STEM}{}", std::env::consts::EXE_SUFFIX))
}

/// Drain the worker's diagnostic stream into the log.
pub(crate) fn forward_stderr(stderr: WorkerOutput, pid: Option<u32>) {
    tokio::spawn(async move {
        let mut lines = FramedRead::new(stderr, LineCodec::new());
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => tracing::warn!(target: "kitchen_bus::worker", pid, "{}", line),
                Err(e) => {
                    tracing::debug!(pid, error = %e, "Worker stderr read failed");
                    break;
                }
            }
        }
        tracing::trace!(pid, "Worker stderr closed");
    });
}
