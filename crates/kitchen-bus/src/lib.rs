//! kitchen-bus: single-flight command bus and HTTP front for the kitchen worker.

pub mod bridge;
pub mod bus;
pub mod service;
pub mod transport;
pub mod worker;

#[cfg(test)]
mod testing;

pub use bridge::protocol::{Command, CommandError, WorkerCommand};
pub use bus::{
    BusConfig, BusError, BusResult, BusSnapshot, CommandBus, ResponseHandle, SupervisorTask,
    WorkerState,
};
pub use service::{HealthSnapshot, KitchenService, ServiceError};
pub use transport::{ServerConfig, serve};
pub use worker::{
    ExecutableSpawner, SpawnError, WorkerSpawner, default_worker_path, worker_path_in,
};

/// Version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
