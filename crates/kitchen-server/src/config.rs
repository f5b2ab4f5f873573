//! Environment configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kitchen_bus::{BusConfig, ServerConfig, WorkerSpawner, worker_path_in};

/// Directory holding the dashboard assets, relative to the executable.
const WEB_DIR_NAME: &str = "interface_web";

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub worker: PathBuf,
    pub web_dir: PathBuf,
    pub command_timeout: Duration,
    pub restart_cooldown: Duration,
    pub shutdown_grace: Duration,
    pub queue_timeout: Duration,
}

impl Settings {
    /// Read settings from the process environment; paths default to
    /// siblings of the running executable.
    pub fn from_env() -> Result<Self> {
        let exe = std::env::current_exe().context("failed to locate the server executable")?;
        let exe_dir = exe.parent().unwrap_or_else(|| Path::new("."));
        Self::from_lookup(|key| std::env::var(key).ok(), exe_dir)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, exe_dir: &Path) -> Result<Self> {
        let defaults = ServerConfig::default();
        let server = ServerConfig {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: match lookup("PORT") {
                Some(raw) => raw
                    .trim()
                    .parse::<u16>()
                    .with_context(|| format!("PORT must be a port number, got {raw:?}"))?,
                None => defaults.port,
            },
        };

        let millis = |key: &str, default: u64| -> Result<Duration> {
            let ms = match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("{key} must be milliseconds, got {raw:?}"))?,
                None => default,
            };
            Ok(Duration::from_millis(ms))
        };

        Ok(Self {
            server,
            worker: lookup("KITCHEN_WORKER")
                .map(PathBuf::from)
                .unwrap_or_else(|| worker_path_in(exe_dir)),
            web_dir: lookup("KITCHEN_WEB_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| exe_dir.join(WEB_DIR_NAME)),
            command_timeout: millis("KITCHEN_COMMAND_TIMEOUT_MS", 10_000)?,
            restart_cooldown: millis("KITCHEN_RESTART_COOLDOWN_MS", 500)?,
            shutdown_grace: millis("KITCHEN_SHUTDOWN_GRACE_MS", 500)?,
            queue_timeout: millis("KITCHEN_QUEUE_TIMEOUT_MS", 30_000)?,
        })
    }

    pub fn bus_config(&self, spawner: Arc<dyn WorkerSpawner>) -> BusConfig {
        BusConfig::new(spawner)
            .with_command_timeout(self.command_timeout)
            .with_restart_cooldown(self.restart_cooldown)
            .with_shutdown_grace(self.shutdown_grace)
            .with_queue_timeout(self.queue_timeout)
    }
}
