//! Logging utilities for consul-pager components.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Plain,
    /// One JSON object per line
    Json,
}

/// Build the level filter.
///
/// `RUST_LOG` wins over the configured level when it is set.
pub fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize tracing with the given default level and format.
pub fn init(default_level: &str, format: LogFormat) {
    let registry = tracing_subscriber::registry().with(filter(default_level));
    match format {
        LogFormat::Plain => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

/// Like [`init`] but does not panic when a global subscriber already exists.
///
/// Tests call this from many places.
pub fn try_init(default_level: &str) -> bool {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(fmt::layer().with_test_writer())
        .try_init()
        .is_ok()
}
