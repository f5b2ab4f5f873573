//! KitchenService: transport-agnostic access to the worker.
//!
//! Transports translate their requests into [`WorkerCommand`]s and hand them
//! to this service; it renders the wire line and routes it through the bus.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::VERSION;
use crate::bridge::protocol::{CommandError, WorkerCommand};
use crate::bus::{BusError, BusSnapshot, CommandBus, WorkerState};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid command: {0}")]
    InvalidCommand(#[from] CommandError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Snapshot of service health for transports to query.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub version: &'static str,
    #[serde(flatten)]
    pub bus: BusSnapshot,
}

impl HealthSnapshot {
    pub fn is_ready(&self) -> bool {
        self.bus.state == WorkerState::Running
    }
}

pub struct KitchenService {
    bus: CommandBus,
    web_dir: PathBuf,
}

impl KitchenService {
    pub fn new(bus: CommandBus, web_dir: impl Into<PathBuf>) -> Self {
        Self {
            bus,
            web_dir: web_dir.into(),
        }
    }

    pub async fn execute(&self, command: WorkerCommand) -> Result<serde_json::Value, ServiceError> {
        let line = command.to_command()?;
        Ok(self.bus.send(line).await?)
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            version: VERSION,
            bus: self.bus.snapshot(),
        }
    }

    pub fn web_dir(&self) -> &Path {
        &self.web_dir
    }

    pub fn bus(&self) -> &CommandBus {
        &self.bus
    }

    /// Stop the worker; the supervisor task finishes on its own.
    pub fn shutdown(&self) {
        self.bus.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::bus::BusConfig;
    use crate::testing::{FakeSpawner, spawn_responder};

    #[tokio::test]
    async fn execute_renders_and_sends_command() {
        let (spawner, mut workers) = FakeSpawner::new();
        let (bus, _task) = CommandBus::start(BusConfig::new(Arc::new(spawner)));
        let service = KitchenService::new(bus, "web");

        let worker = workers.recv().await.unwrap();
        let mut seen = spawn_responder(worker, |_| Some(r#"{"ok":true,"id":1}"#.to_string()));

        let value = service
            .execute(WorkerCommand::AddCatalogItem {
                name: "Flour".into(),
                unit: "kg".into(),
            })
            .await
            .unwrap();

        assert_eq!(value, json!({"ok": true, "id": 1}));
        assert_eq!(seen.recv().await.unwrap(), "ADD_CATALOGO Flour|kg");
    }

    #[tokio::test]
    async fn invalid_command_never_reaches_worker() {
        let (spawner, mut workers) = FakeSpawner::new();
        let (bus, _task) = CommandBus::start(BusConfig::new(Arc::new(spawner)));
        let service = KitchenService::new(bus, "web");
        let worker = workers.recv().await.unwrap();
        let mut seen = spawn_responder(worker, |_| Some("{}".to_string()));

        let err = service
            .execute(WorkerCommand::AddRecipe {
                name: "Bread".into(),
                preparation: "mix|bake".into(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::InvalidCommand(_)));
        assert!(seen.try_recv().is_err());
    }

    #[tokio::test]
    async fn health_reports_version_and_state() {
        let (spawner, mut workers) = FakeSpawner::new();
        let (bus, _task) = CommandBus::start(BusConfig::new(Arc::new(spawner)));
        let service = KitchenService::new(bus, "web");
        let _worker = workers.recv().await.unwrap();

        let mut snapshots = service.bus().subscribe();
        snapshots
            .wait_for(|s| s.state == WorkerState::Running)
            .await
            .unwrap();

        let health = service.health();
        assert!(health.is_ready());
        assert_eq!(health.version, VERSION);
    }
}
