//! kitchen-server: HTTP front for the kitchen worker executable.

mod config;

use std::sync::Arc;

use anyhow::Result;
use kitchen_bus::{CommandBus, ExecutableSpawner, KitchenService, serve};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Settings;

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `KITCHEN_LOG` picks the level for the
/// project crates. `LOG_FORMAT=json` switches to JSON lines on stderr.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("KITCHEN_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };

        EnvFilter::new(format!(
            "kitchen_bus={level},kitchen_server={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = Settings::from_env()?;
    info!(
        worker = %settings.worker.display(),
        web_dir = %settings.web_dir.display(),
        version = kitchen_bus::VERSION,
        "Starting kitchen bus"
    );

    let spawner = Arc::new(ExecutableSpawner::new(&settings.worker));
    let (bus, supervisor) = CommandBus::start(settings.bus_config(spawner));
    let service = Arc::new(KitchenService::new(bus, &settings.web_dir));

    let served = serve(settings.server.clone(), Arc::clone(&service)).await;

    // serve() stops the bus on a clean exit; a bind failure lands here first.
    service.shutdown();
    drop(service);
    supervisor.join().await;

    served
}
