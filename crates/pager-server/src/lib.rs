//! consul-pager server
//!
//! Runs the [`pager`] watch engine against a Consul cluster.
//!
//! # Components
//!
//! - **Consul adapters**: blocking health/event queries and a session-based
//!   leadership lock
//! - **Channels**: Slack and generic webhook delivery
//! - **Driver**: periodic leadership supervision and clean teardown
//! - **HTTP server**: `/metrics` and `/status`

pub mod channels;
pub mod cli;
pub mod config;
pub mod consul;
pub mod driver;
pub mod error;
pub mod http_server;
pub mod server;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use consul::{ConsulClient, ConsulError, ConsulLock};
pub use driver::{Driver, DriverState};
pub use error::ServerError;
pub use http_server::MetricsServer;
pub use server::PagerServer;
pub use telemetry::{TelemetryGuard, setup_tracing};
