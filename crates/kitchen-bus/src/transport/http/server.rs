//! HTTP server implementation.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::service::KitchenService;

use super::routes::routes;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// Bind address; `host` must be an IPv4 or IPv6 literal.
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid HOST {:?}: {e}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Start the HTTP server with provided service.
///
/// Returns once a shutdown signal arrived and in-flight requests drained; the
/// worker is told to stop on the way out.
pub async fn serve(config: ServerConfig, service: Arc<KitchenService>) -> anyhow::Result<()> {
    let app = routes(Arc::clone(&service));

    let addr = config.socket_addr()?;

    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Starting kitchen server on {}", actual_addr);
    info!("Dashboard: http://localhost:{}", actual_addr.port());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, stopping worker");

    service.shutdown();

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
///
/// # Panics
///
/// Panics if a signal handler cannot be installed, which only happens outside
/// a properly configured tokio runtime.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!(signal = "SIGINT", "Stopping kitchen server");
        }
        _ = terminate => {
            info!(signal = "SIGTERM", "Stopping kitchen server");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn socket_addr_accepts_ipv4_and_ipv6() {
        let v4 = ServerConfig::default();
        assert_eq!(v4.socket_addr().unwrap().to_string(), "0.0.0.0:3000");

        let v6 = ServerConfig {
            host: "::".to_string(),
            port: 8080,
        };
        assert_eq!(v6.socket_addr().unwrap().to_string(), "[::]:8080");

        let bracketed = ServerConfig {
            host: "[::1]".to_string(),
            port: 8080,
        };
        assert_eq!(bracketed.socket_addr().unwrap().to_string(), "[::1]:8080");
    }

    #[test]
    fn socket_addr_rejects_hostnames() {
        let config = ServerConfig {
            host: "kitchen.local".to_string(),
            port: 3000,
        };
        let err = config.socket_addr().unwrap_err();
        assert!(err.to_string().contains("kitchen.local"));
    }
}
