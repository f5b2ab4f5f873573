//! HTTP transport: JSON API routes plus the dashboard's static files.

pub mod routes;
pub mod server;

pub use routes::{ApiError, routes};
pub use server::{ServerConfig, serve};
